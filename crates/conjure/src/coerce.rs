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

use crate::error::CoerceError;
use crate::value::{ParamType, Value};

/// Converts raw string arguments into values matching `targets`, position by
/// position. Either every argument converts or nothing is returned.
pub fn coerce<S: AsRef<str>>(raw: &[S], targets: &[ParamType]) -> Result<Vec<Value>, CoerceError> {
    if raw.len() != targets.len() {
        return Err(CoerceError::ArityMismatch {
            expected: targets.len(),
            actual: raw.len(),
        });
    }
    raw.iter()
        .zip(targets)
        .enumerate()
        .map(|(index, (raw, &target))| {
            let raw = raw.as_ref();
            target.parse(raw).ok_or_else(|| CoerceError::Coercion {
                index,
                raw: raw.to_string(),
                target,
            })
        })
        .collect()
}
