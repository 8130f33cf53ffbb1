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

pub mod codegen;
pub mod coerce;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod synthesizer;
pub mod value;

pub use coerce::coerce;
pub use compiler::{
    CompiledOperation, Compiler, HostReferences, SandboxLimits, WasmCompiler, WasmOperation,
};
pub use config::{ConfigError, EngineConfig, InvocationSettings, SynthesisSettings};
pub use engine::ExecutionEngine;
pub use error::{
    CoerceError, CompileError, EngineError, InvocationError, Phase, SynthesisError,
};
pub use key::OperationKey;
pub use metrics::{InvocationMetrics, MetricsSnapshot};
pub use record::{OperationRecord, OperationSummary};
pub use registry::OperationRegistry;
pub use synthesizer::{CodeSynthesizer, LlmSynthesizer, SynthesisRequest, SynthesizedSource};
pub use value::{ParamType, Value};
