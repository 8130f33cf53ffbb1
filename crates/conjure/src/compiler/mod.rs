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

pub mod host;
pub mod sandbox;
pub mod wasm;

use crate::error::{CompileError, InvocationError};
use crate::value::{ParamType, Value};
use std::sync::Arc;

pub use host::{HostReferences, HOST_MODULE};
pub use sandbox::SandboxLimits;
pub use wasm::{WasmCompiler, WasmOperation};

/// A resolved, ready-to-call unit produced by a [`Compiler`].
pub trait CompiledOperation: Send + Sync {
    fn entry_point(&self) -> &str;

    fn param_types(&self) -> &[ParamType];

    fn result_type(&self) -> Option<ParamType>;

    /// Callers pass values already coerced to `param_types`.
    fn invoke(&self, args: &[Value]) -> Result<Value, InvocationError>;
}

/// Turns generated source into a [`CompiledOperation`].
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledOperation>, CompileError>;

    /// Declarations of what generated code may reference, for inclusion in prompts.
    fn references(&self) -> Vec<String>;
}
