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

use super::host::HostReferences;
use super::sandbox::{new_store, SandboxLimits, SandboxState};
use super::{CompiledOperation, Compiler};
use crate::error::{CompileError, InvocationError};
use crate::value::{ParamType, Value};
use std::sync::Arc;
use tracing::debug;
use wasmtime::{Config, Engine, ExternType, FuncType, InstancePre, Linker, Module, Trap, Val, ValType};

/// Compiles WAT text with wasmtime and resolves its single exported function.
#[derive(Clone)]
pub struct WasmCompiler {
    engine: Engine,
    linker: Arc<Linker<SandboxState>>,
    references: HostReferences,
    limits: SandboxLimits,
}

impl WasmCompiler {
    pub fn new(references: HostReferences, limits: SandboxLimits) -> wasmtime::Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config)?;
        let mut linker = Linker::new(&engine);
        references.link(&mut linker)?;
        Ok(Self {
            engine,
            linker: Arc::new(linker),
            references,
            limits,
        })
    }

    fn compile_wasm(&self, source: &str) -> Result<WasmOperation, CompileError> {
        let bytes = wat::parse_str(source).map_err(|e| CompileError::Compilation {
            diagnostics: e.to_string().lines().map(ToString::to_string).collect(),
        })?;
        let module = Module::from_binary(&self.engine, &bytes).map_err(diagnostics)?;
        let instance_pre = self.linker.instantiate_pre(&module).map_err(diagnostics)?;

        let (entry_point, func_type) = resolve_entry_point(&module)?;
        let params = func_type
            .params()
            .enumerate()
            .map(|(i, ty)| {
                param_type_of(&ty).ok_or_else(|| {
                    CompileError::Resolution(format!(
                        "parameter {i} of '{entry_point}' has unsupported type {ty}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let result = match func_type.results().collect::<Vec<_>>().as_slice() {
            [] => None,
            [ty] => Some(param_type_of(ty).ok_or_else(|| {
                CompileError::Resolution(format!(
                    "'{entry_point}' returns unsupported type {ty}"
                ))
            })?),
            many => {
                return Err(CompileError::Resolution(format!(
                    "'{entry_point}' returns {} values; at most one is supported",
                    many.len()
                )))
            }
        };

        let operation = WasmOperation {
            engine: self.engine.clone(),
            instance_pre,
            entry_point,
            params,
            result,
            limits: self.limits,
        };
        // Probe instantiation: runs any start function under the sandbox limits.
        operation
            .instantiate()
            .map_err(|e| CompileError::Compilation {
                diagnostics: vec![e.to_string()],
            })?;
        debug!(
            entry_point = %operation.entry_point,
            params = operation.params.len(),
            bytes = bytes.len(),
            "compiled wasm operation"
        );
        Ok(operation)
    }
}

impl Compiler for WasmCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledOperation>, CompileError> {
        Ok(Arc::new(self.compile_wasm(source)?))
    }

    fn references(&self) -> Vec<String> {
        self.references.describe()
    }
}

fn diagnostics(err: wasmtime::Error) -> CompileError {
    CompileError::Compilation {
        diagnostics: err.chain().map(ToString::to_string).collect(),
    }
}

/// Exactly one exported function; memories, globals and tables are ignored.
fn resolve_entry_point(module: &Module) -> Result<(String, FuncType), CompileError> {
    let mut funcs = module
        .exports()
        .filter_map(|export| match export.ty() {
            ExternType::Func(ty) => Some((export.name().to_string(), ty)),
            _ => None,
        })
        .collect::<Vec<_>>();
    match funcs.len() {
        0 => Err(CompileError::Resolution(
            "module exports no functions".to_string(),
        )),
        1 => Ok(funcs.remove(0)),
        n => Err(CompileError::Resolution(format!(
            "module exports {n} functions ({}); expected exactly one",
            funcs
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

const fn param_type_of(ty: &ValType) -> Option<ParamType> {
    match ty {
        ValType::I32 => Some(ParamType::Int32),
        ValType::I64 => Some(ParamType::Int64),
        ValType::F32 => Some(ParamType::Float32),
        ValType::F64 => Some(ParamType::Float64),
        _ => None,
    }
}

/// A pre-linked module plus the signature of its entry point. Each call runs
/// in a freshly instantiated, fuel-limited store.
pub struct WasmOperation {
    engine: Engine,
    instance_pre: InstancePre<SandboxState>,
    entry_point: String,
    params: Vec<ParamType>,
    result: Option<ParamType>,
    limits: SandboxLimits,
}

impl WasmOperation {
    fn instantiate(
        &self,
    ) -> Result<(wasmtime::Store<SandboxState>, wasmtime::Instance), InvocationError> {
        let mut store = new_store(&self.engine, &self.limits)
            .map_err(|e| InvocationError::Instantiation(e.to_string()))?;
        let instance = self
            .instance_pre
            .instantiate(&mut store)
            .map_err(|e| trap_or(e, InvocationError::Instantiation))?;
        Ok((store, instance))
    }

    fn to_wasm_args(&self, args: &[Value]) -> Result<Vec<Val>, InvocationError> {
        if args.len() != self.params.len() {
            return Err(InvocationError::Signature(format!(
                "'{}' takes {} arguments, got {}",
                self.entry_point,
                self.params.len(),
                args.len()
            )));
        }
        args.iter()
            .zip(&self.params)
            .enumerate()
            .map(|(i, (arg, ty))| match (arg, ty) {
                (Value::Int32(v), ParamType::Int32) => Ok(Val::I32(*v)),
                (Value::Int64(v), ParamType::Int64) => Ok(Val::I64(*v)),
                (Value::Float32(v), ParamType::Float32) => Ok(Val::F32(v.to_bits())),
                (Value::Float64(v), ParamType::Float64) => Ok(Val::F64(v.to_bits())),
                _ => Err(InvocationError::Signature(format!(
                    "argument {i} is {arg:?}, expected {ty}"
                ))),
            })
            .collect()
    }
}

impl CompiledOperation for WasmOperation {
    fn entry_point(&self) -> &str {
        &self.entry_point
    }

    fn param_types(&self) -> &[ParamType] {
        &self.params
    }

    fn result_type(&self) -> Option<ParamType> {
        self.result
    }

    fn invoke(&self, args: &[Value]) -> Result<Value, InvocationError> {
        let params = self.to_wasm_args(args)?;
        let (mut store, instance) = self.instantiate()?;
        let func = instance
            .get_func(&mut store, &self.entry_point)
            .ok_or_else(|| {
                InvocationError::Instantiation(format!("export '{}' missing", self.entry_point))
            })?;
        let mut results = self.result.map(placeholder).into_iter().collect::<Vec<_>>();
        func.call(&mut store, &params, &mut results)
            .map_err(|e| trap_or(e, InvocationError::Trap))?;

        Ok(match results.first() {
            None => Value::Unit,
            Some(Val::I32(v)) => Value::Int32(*v),
            Some(Val::I64(v)) => Value::Int64(*v),
            Some(Val::F32(bits)) => Value::Float32(f32::from_bits(*bits)),
            Some(Val::F64(bits)) => Value::Float64(f64::from_bits(*bits)),
            Some(other) => {
                return Err(InvocationError::Signature(format!(
                    "unexpected result {other:?}"
                )))
            }
        })
    }
}

const fn placeholder(ty: ParamType) -> Val {
    match ty {
        ParamType::Int64 => Val::I64(0),
        ParamType::Float32 => Val::F32(0),
        ParamType::Float64 => Val::F64(0),
        ParamType::Int32 | ParamType::Bool | ParamType::Text => Val::I32(0),
    }
}

fn trap_or(err: wasmtime::Error, other: fn(String) -> InvocationError) -> InvocationError {
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => InvocationError::FuelExhausted,
        _ => other(format!("{err:#}")),
    }
}
