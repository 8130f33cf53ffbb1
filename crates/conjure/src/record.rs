// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::compiler::CompiledOperation;
use crate::error::InvocationError;
use crate::key::OperationKey;
use crate::metrics::{InvocationMetrics, MetricsSnapshot};
use crate::value::{ParamType, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A compiled operation as held by the registry. Immutable once built apart
/// from its metrics counters.
pub struct OperationRecord {
    key: OperationKey,
    unit_name: String,
    param_types: Vec<ParamType>,
    operation: Arc<dyn CompiledOperation>,
    created_at: DateTime<Utc>,
    metrics: InvocationMetrics,
}

/// Serialisable view of a record for listings.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub category: String,
    pub operation: String,
    pub unit_name: String,
    pub entry_point: String,
    pub param_types: Vec<ParamType>,
    pub result_type: Option<ParamType>,
    pub created_at: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
}

impl OperationRecord {
    pub fn new(
        key: OperationKey,
        unit_name: impl Into<String>,
        operation: Arc<dyn CompiledOperation>,
    ) -> Self {
        Self {
            key,
            unit_name: unit_name.into(),
            param_types: operation.param_types().to_vec(),
            operation,
            created_at: Utc::now(),
            metrics: InvocationMetrics::default(),
        }
    }

    pub const fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn param_types(&self) -> &[ParamType] {
        &self.param_types
    }

    pub fn arity(&self) -> usize {
        self.param_types.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Calls the compiled unit without touching metrics; callers report the
    /// outcome they observed through [`Self::record_outcome`].
    pub fn invoke(&self, args: &[Value]) -> Result<Value, InvocationError> {
        self.operation.invoke(args)
    }

    pub fn record_outcome(&self, elapsed: Duration, success: bool) {
        self.metrics.record(elapsed, success);
    }

    pub fn summary(&self) -> OperationSummary {
        OperationSummary {
            category: self.key.category().to_string(),
            operation: self.key.name().to_string(),
            unit_name: self.unit_name.clone(),
            entry_point: self.operation.entry_point().to_string(),
            param_types: self.param_types.clone(),
            result_type: self.operation.result_type(),
            created_at: self.created_at,
            metrics: self.metrics.snapshot(),
        }
    }
}

impl fmt::Debug for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRecord")
            .field("key", &self.key)
            .field("unit_name", &self.unit_name)
            .field("entry_point", &self.operation.entry_point())
            .field("param_types", &self.param_types)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
