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

//! Append-only cache of compiled operations with per-key single-flight
//! implementation.
//!
//! A key's slot is either `Ready` or `Pending`. The first caller for an
//! absent key spawns the implement work as its own task and parks a shared
//! handle to it in the slot; later callers for the same key await that handle
//! instead of starting a second synthesis. The task publishes its outcome
//! into the map before any waiter sees it: success replaces the slot with
//! `Ready`, failure removes it so the next call starts over.

use crate::error::EngineError;
use crate::key::OperationKey;
use crate::record::{OperationRecord, OperationSummary};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type ImplementOutcome = Result<Arc<OperationRecord>, EngineError>;
type InFlight = Shared<BoxFuture<'static, ImplementOutcome>>;

enum Slot {
    Ready(Arc<OperationRecord>),
    Pending(InFlight),
}

#[derive(Clone, Default)]
pub struct OperationRegistry {
    slots: Arc<DashMap<OperationKey, Slot>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking read. Keys still being implemented read as absent.
    pub fn lookup(&self, key: &OperationKey) -> Option<Arc<OperationRecord>> {
        self.slots.get(key).and_then(|slot| match slot.value() {
            Slot::Ready(record) => Some(Arc::clone(record)),
            Slot::Pending(_) => None,
        })
    }

    pub fn contains(&self, key: &OperationKey) -> bool {
        self.lookup(key).is_some()
    }

    pub fn is_pending(&self, key: &OperationKey) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| matches!(slot.value(), Slot::Pending(_)))
    }

    /// Returns the record for `key`, running `implement` at most once across
    /// all concurrent callers when it is absent. A failure is delivered to
    /// every caller waiting at the time and leaves the key absent.
    pub async fn get_or_implement<F, Fut>(
        &self,
        key: &OperationKey,
        implement: F,
    ) -> Result<Arc<OperationRecord>, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OperationRecord, EngineError>> + Send + 'static,
    {
        let in_flight = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(record) => return Ok(Arc::clone(record)),
                Slot::Pending(in_flight) => {
                    debug!(%key, "joining in-flight implementation");
                    in_flight.clone()
                }
            },
            Entry::Vacant(entry) => {
                let in_flight = self.start(key.clone(), implement());
                entry.insert(Slot::Pending(in_flight.clone()));
                in_flight
            }
        };
        in_flight.await
    }

    fn start<Fut>(&self, key: OperationKey, work: Fut) -> InFlight
    where
        Fut: Future<Output = Result<OperationRecord, EngineError>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let outcome = work.await.map(Arc::new);
            match &outcome {
                Ok(record) => {
                    slots.insert(task_key, Slot::Ready(Arc::clone(record)));
                }
                Err(_) => {
                    slots.remove(&task_key);
                }
            }
            outcome
        });

        let slots = Arc::clone(&self.slots);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    warn!(%key, error = %join_err, "implement task did not complete");
                    slots.remove_if(&key, |_, slot| matches!(slot, Slot::Pending(_)));
                    Err(EngineError::Aborted {
                        key,
                        reason: join_err.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of implemented operations.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<OperationKey> {
        let mut keys = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .map(|slot| slot.key().clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn records(&self) -> Vec<Arc<OperationRecord>> {
        let mut records = self
            .slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(record) => Some(Arc::clone(record)),
                Slot::Pending(_) => None,
            })
            .collect::<Vec<_>>();
        records.sort_by(|a, b| a.key().cmp(b.key()));
        records
    }

    pub fn summaries(&self) -> Vec<OperationSummary> {
        self.records().iter().map(|record| record.summary()).collect()
    }
}
