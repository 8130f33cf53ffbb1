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

use crate::key::OperationKey;
use crate::value::ParamType;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("code generation request failed: {0}")]
    Provider(String),
    #[error("code generation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("code generation returned no source")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("compilation failed: {}", .diagnostics.join("; "))]
    Compilation { diagnostics: Vec<String> },
    /// The artifact compiled but does not define exactly one usable entry point.
    #[error("resolution failed: {0}")]
    Resolution(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoerceError {
    #[error("expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("argument {index} ({raw:?}) is not a valid {target}")]
    Coercion {
        index: usize,
        raw: String,
        target: ParamType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("trap: {0}")]
    Trap(String),
    #[error("fuel exhausted")]
    FuelExhausted,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("argument mismatch: {0}")]
    Signature(String),
    #[error("instantiation failed: {0}")]
    Instantiation(String),
    #[error("invocation aborted: {0}")]
    Aborted(String),
}

/// Where in a key's lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Implementing,
    Executing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implementing => f.write_str("implementing"),
            Self::Executing => f.write_str("executing"),
        }
    }
}

/// Failure surfaced by the execution engine, always tagged with the key it concerns.
///
/// Cloneable so that a single implement failure can be handed to every caller
/// waiting on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("synthesis of {key} failed: {source}")]
    Synthesis {
        key: OperationKey,
        source: SynthesisError,
    },
    #[error("compilation of {key} failed: {}", .diagnostics.join("; "))]
    Compilation {
        key: OperationKey,
        diagnostics: Vec<String>,
    },
    #[error("resolution of {key} failed: {reason}")]
    Resolution { key: OperationKey, reason: String },
    #[error("implementing {key} was aborted: {reason}")]
    Aborted { key: OperationKey, reason: String },
    #[error("{key} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        key: OperationKey,
        expected: usize,
        actual: usize,
    },
    #[error("argument {index} of {key} ({raw:?}) is not a valid {target}")]
    Coercion {
        key: OperationKey,
        index: usize,
        raw: String,
        target: ParamType,
    },
    #[error("invocation of {key} failed: {source}")]
    Invocation {
        key: OperationKey,
        source: InvocationError,
    },
}

impl EngineError {
    pub fn compile(key: OperationKey, err: CompileError) -> Self {
        match err {
            CompileError::Compilation { diagnostics } => Self::Compilation { key, diagnostics },
            CompileError::Resolution(reason) => Self::Resolution { key, reason },
        }
    }

    pub fn coerce(key: OperationKey, err: CoerceError) -> Self {
        match err {
            CoerceError::ArityMismatch { expected, actual } => Self::ArityMismatch {
                key,
                expected,
                actual,
            },
            CoerceError::Coercion { index, raw, target } => Self::Coercion {
                key,
                index,
                raw,
                target,
            },
        }
    }

    pub const fn key(&self) -> &OperationKey {
        match self {
            Self::Synthesis { key, .. }
            | Self::Compilation { key, .. }
            | Self::Resolution { key, .. }
            | Self::Aborted { key, .. }
            | Self::ArityMismatch { key, .. }
            | Self::Coercion { key, .. }
            | Self::Invocation { key, .. } => key,
        }
    }

    pub const fn phase(&self) -> Phase {
        match self {
            Self::Synthesis { .. }
            | Self::Compilation { .. }
            | Self::Resolution { .. }
            | Self::Aborted { .. } => Phase::Implementing,
            Self::ArityMismatch { .. } | Self::Coercion { .. } | Self::Invocation { .. } => {
                Phase::Executing
            }
        }
    }

    /// Implementing failures leave the key unimplemented, so a later call
    /// regenerates from scratch.
    pub const fn is_retriable(&self) -> bool {
        matches!(self.phase(), Phase::Implementing)
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Synthesis { .. } => "synthesis",
            Self::Compilation { .. } => "compilation",
            Self::Resolution { .. } => "resolution",
            Self::Aborted { .. } => "aborted",
            Self::ArityMismatch { .. } => "arity_mismatch",
            Self::Coercion { .. } => "coercion",
            Self::Invocation { .. } => "invocation",
        }
    }
}
