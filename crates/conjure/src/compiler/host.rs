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

use super::sandbox::SandboxState;
use wasmtime::Linker;

/// Import module name under which host functions are offered to generated code.
pub const HOST_MODULE: &str = "math";

#[derive(Debug, Clone, Copy)]
enum HostFn {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
}

#[derive(Debug, Clone, Copy)]
pub struct HostReference {
    pub name: &'static str,
    func: HostFn,
}

const MATH: &[HostReference] = &[
    HostReference { name: "pow", func: HostFn::Binary(f64::powf) },
    HostReference { name: "exp", func: HostFn::Unary(f64::exp) },
    HostReference { name: "ln", func: HostFn::Unary(f64::ln) },
    HostReference { name: "log10", func: HostFn::Unary(f64::log10) },
    HostReference { name: "sin", func: HostFn::Unary(f64::sin) },
    HostReference { name: "cos", func: HostFn::Unary(f64::cos) },
    HostReference { name: "tan", func: HostFn::Unary(f64::tan) },
    HostReference { name: "atan2", func: HostFn::Binary(f64::atan2) },
    HostReference { name: "hypot", func: HostFn::Binary(f64::hypot) },
];

/// The set of imports generated modules may link against. Anything else is
/// rejected at compile time.
#[derive(Debug, Clone)]
pub struct HostReferences {
    entries: Vec<HostReference>,
}

impl Default for HostReferences {
    fn default() -> Self {
        Self::math()
    }
}

impl HostReferences {
    pub fn math() -> Self {
        Self {
            entries: MATH.to_vec(),
        }
    }

    pub const fn none() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One WAT import declaration per host function, suitable for prompts.
    pub fn describe(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|r| {
                let params = match r.func {
                    HostFn::Unary(_) => "f64",
                    HostFn::Binary(_) => "f64 f64",
                };
                format!(
                    "(import \"{HOST_MODULE}\" \"{}\" (func (param {params}) (result f64)))",
                    r.name
                )
            })
            .collect()
    }

    pub(crate) fn link(&self, linker: &mut Linker<SandboxState>) -> wasmtime::Result<()> {
        for r in &self.entries {
            match r.func {
                HostFn::Unary(f) => {
                    linker.func_wrap(HOST_MODULE, r.name, move |x: f64| f(x))?;
                }
                HostFn::Binary(f) => {
                    linker.func_wrap(HOST_MODULE, r.name, move |a: f64, b: f64| f(a, b))?;
                }
            }
        }
        Ok(())
    }
}
