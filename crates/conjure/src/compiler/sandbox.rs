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

use serde::{Deserialize, Serialize};
use wasmtime::{Engine, Store, StoreLimits, StoreLimitsBuilder};

/// Per-invocation resource caps for generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Fuel units granted to each call; roughly one per executed instruction.
    pub fuel: u64,
    pub max_memory_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            fuel: 10_000_000,
            max_memory_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Host-side state owned by each sandboxed store.
pub struct SandboxState {
    limits: StoreLimits,
}

impl SandboxState {
    fn new(limits: &SandboxLimits) -> Self {
        Self {
            limits: StoreLimitsBuilder::new()
                .memory_size(limits.max_memory_bytes)
                .instances(1)
                .memories(1)
                .tables(1)
                .build(),
        }
    }
}

/// A fresh store with fuel and memory caps applied. Every instantiation gets
/// its own store so nothing survives between calls.
pub(crate) fn new_store(
    engine: &Engine,
    limits: &SandboxLimits,
) -> wasmtime::Result<Store<SandboxState>> {
    let mut store = Store::new(engine, SandboxState::new(limits));
    store.limiter(|state| &mut state.limits);
    store.set_fuel(limits.fuel)?;
    Ok(store)
}
