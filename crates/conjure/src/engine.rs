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

use crate::coerce::coerce;
use crate::compiler::{Compiler, HostReferences, WasmCompiler};
use crate::config::EngineConfig;
use crate::error::{EngineError, InvocationError};
use crate::key::OperationKey;
use crate::record::{OperationRecord, OperationSummary};
use crate::registry::OperationRegistry;
use crate::synthesizer::{CodeSynthesizer, LlmSynthesizer, SynthesisRequest};
use crate::value::Value;
use conjure_llm::ApiClient;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives a key from unimplemented through synthesis and compilation to
/// invocation.
#[derive(Clone)]
pub struct ExecutionEngine {
    synthesizer: Arc<dyn CodeSynthesizer>,
    compiler: Arc<dyn Compiler>,
    registry: OperationRegistry,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        synthesizer: Arc<dyn CodeSynthesizer>,
        compiler: Arc<dyn Compiler>,
        registry: OperationRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            synthesizer,
            compiler,
            registry,
            config,
        }
    }

    /// Wasmtime backend with the math host imports, generating through `client`.
    pub fn with_client(client: Arc<dyn ApiClient>, config: EngineConfig) -> wasmtime::Result<Self> {
        let compiler = WasmCompiler::new(HostReferences::math(), config.sandbox)?;
        let synthesizer = LlmSynthesizer::new(client, config.synthesis.clone())
            .with_references(compiler.references());
        Ok(Self::new(
            Arc::new(synthesizer),
            Arc::new(compiler),
            OperationRegistry::new(),
            config,
        ))
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Never starts an implementation.
    pub fn is_implemented(&self, key: &OperationKey) -> bool {
        self.registry.contains(key)
    }

    /// Synthesizes and compiles `key` unless it is already implemented or in
    /// flight, in which case the existing or pending record is returned.
    pub async fn implement(
        &self,
        key: &OperationKey,
        arity: usize,
        examples: Vec<Vec<String>>,
    ) -> Result<Arc<OperationRecord>, EngineError> {
        let synthesizer = Arc::clone(&self.synthesizer);
        let compiler = Arc::clone(&self.compiler);
        let request = SynthesisRequest::new(key.clone(), arity, examples);
        self.registry
            .get_or_implement(key, move || implement_operation(synthesizer, compiler, request))
            .await
    }

    /// Coerces `raw_args` against the operation's parameter types and calls it.
    /// An unimplemented key is implemented first, taking its arity and single
    /// example set from `raw_args`.
    pub async fn execute<S: AsRef<str>>(
        &self,
        key: &OperationKey,
        raw_args: &[S],
    ) -> Result<Value, EngineError> {
        let record = match self.registry.lookup(key) {
            Some(record) => {
                debug!(%key, "using cached operation");
                record
            }
            None => {
                let example = raw_args
                    .iter()
                    .map(|arg| arg.as_ref().to_string())
                    .collect::<Vec<_>>();
                self.implement(key, example.len(), vec![example]).await?
            }
        };
        self.invoke(&record, raw_args).await
    }

    async fn invoke<S: AsRef<str>>(
        &self,
        record: &Arc<OperationRecord>,
        raw_args: &[S],
    ) -> Result<Value, EngineError> {
        let key = record.key();
        let args =
            coerce(raw_args, record.param_types()).map_err(|e| EngineError::coerce(key.clone(), e))?;

        let timeout = self.config.invocation.timeout();
        let task_record = Arc::clone(record);
        let started = Instant::now();
        let handle = tokio::task::spawn_blocking(move || task_record.invoke(&args));

        // A call that outlives the timeout keeps running until its fuel runs out.
        let outcome = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(InvocationError::Aborted(join_err.to_string())),
            Err(_) => Err(InvocationError::TimedOut(timeout)),
        };
        record.record_outcome(started.elapsed(), outcome.is_ok());

        outcome.map_err(|source| {
            warn!(%key, error = %source, "invocation failed");
            EngineError::Invocation {
                key: key.clone(),
                source,
            }
        })
    }

    pub fn operations(&self) -> Vec<OperationSummary> {
        self.registry.summaries()
    }
}

async fn implement_operation(
    synthesizer: Arc<dyn CodeSynthesizer>,
    compiler: Arc<dyn Compiler>,
    request: SynthesisRequest,
) -> Result<OperationRecord, EngineError> {
    let key = request.key.clone();
    let started = Instant::now();
    info!(%key, arity = request.arity, "implementing operation");

    let result = build_record(synthesizer, compiler, request).await;
    match &result {
        Ok(record) => info!(
            %key,
            unit = record.unit_name(),
            params = record.arity(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "operation implemented"
        ),
        Err(err) => warn!(
            %key,
            kind = err.kind(),
            error = %err,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "implementing operation failed"
        ),
    }
    result
}

async fn build_record(
    synthesizer: Arc<dyn CodeSynthesizer>,
    compiler: Arc<dyn Compiler>,
    request: SynthesisRequest,
) -> Result<OperationRecord, EngineError> {
    let key = request.key.clone();
    let generated = synthesizer
        .synthesize(&request)
        .await
        .map_err(|source| EngineError::Synthesis {
            key: key.clone(),
            source,
        })?;

    let source = generated.source;
    let compiled = tokio::task::spawn_blocking(move || compiler.compile(&source))
        .await
        .map_err(|join_err| EngineError::Aborted {
            key: key.clone(),
            reason: join_err.to_string(),
        })?
        .map_err(|err| EngineError::compile(key.clone(), err))?;

    let resolved = compiled.param_types().len();
    if resolved != request.arity {
        return Err(EngineError::Resolution {
            key,
            reason: format!(
                "entry point {} takes {resolved} parameters, expected {}",
                compiled.entry_point(),
                request.arity
            ),
        });
    }

    if compiled.entry_point() != generated.unit_name {
        debug!(
            %key,
            unit = %generated.unit_name,
            entry_point = compiled.entry_point(),
            "generated module exports a different name than requested"
        );
    }

    Ok(OperationRecord::new(key, generated.unit_name, compiled))
}
