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

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free invocation counters attached to each registered operation.
#[derive(Debug, Default)]
pub struct InvocationMetrics {
    total_calls: AtomicU64,
    error_count: AtomicU64,
    avg_execution_time_ns: AtomicU64,
    last_executed_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub error_count: u64,
    pub avg_execution_time: Duration,
    pub last_executed: Option<DateTime<Utc>>,
}

impl InvocationMetrics {
    pub fn record(&self, duration: Duration, success: bool) {
        let calls_before = self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            let dur_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
            // Exponential moving average, seeded by the first sample.
            self.avg_execution_time_ns
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    if calls_before == 0 || current == 0 {
                        Some(dur_ns)
                    } else {
                        Some(current - current / 10 + dur_ns / 10)
                    }
                })
                .ok();
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last_executed_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_ms = self.last_executed_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_execution_time: Duration::from_nanos(
                self.avg_execution_time_ns.load(Ordering::Relaxed),
            ),
            last_executed: (last_ms > 0)
                .then(|| i64::try_from(last_ms).ok())
                .flatten()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }
}
