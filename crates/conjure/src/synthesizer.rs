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

use crate::codegen::{normalize_wat, SourceMetrics};
use crate::config::SynthesisSettings;
use crate::error::SynthesisError;
use crate::key::OperationKey;
use async_trait::async_trait;
use conjure_llm::ApiClient;
use llm_contracts::{GenerationConfig, LLMError, Message, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What the engine asks a synthesizer for. Lives only for one implement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub key: OperationKey,
    pub arity: usize,
    pub examples: Vec<Vec<String>>,
}

impl SynthesisRequest {
    pub fn new(key: OperationKey, arity: usize, examples: Vec<Vec<String>>) -> Self {
        Self {
            key,
            arity,
            examples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSource {
    /// Fresh per attempt, so two attempts for one key never share a name.
    pub unit_name: String,
    pub source: String,
}

#[async_trait]
pub trait CodeSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesizedSource, SynthesisError>;
}

/// Asks a chat-completion backend for a WAT module.
pub struct LlmSynthesizer {
    client: Arc<dyn ApiClient>,
    settings: SynthesisSettings,
    references: Vec<String>,
}

impl LlmSynthesizer {
    pub fn new(client: Arc<dyn ApiClient>, settings: SynthesisSettings) -> Self {
        Self {
            client,
            settings,
            references: Vec::new(),
        }
    }

    /// Import declarations the generated module is allowed to use.
    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    /// Prompt pair for `request`. Depends only on its arguments.
    pub fn build_messages(&self, request: &SynthesisRequest, unit_name: &str) -> Vec<Message> {
        let mut system = format!(
            "You write WebAssembly text format (WAT) modules implementing {} operations. \
             Respond with a single (module ...) that exports exactly one function. \
             Use only i32, i64, f32 and f64 parameters and at most one result.",
            request.key.category()
        );
        if self.references.is_empty() {
            system.push_str(" The module must not declare any imports.");
        } else {
            system.push_str(" The only imports available are:\n");
            system.push_str(&self.references.join("\n"));
            system.push('\n');
        }
        system.push_str("\nReturn only the module source, with no explanation or markdown formatting.");

        let mut user = format!(
            "Generate a {} function named ${unit_name} exported as \"{unit_name}\" that accepts {} parameters",
            request.key.name(),
            request.arity
        );
        let examples = request
            .examples
            .iter()
            .map(|set| format!("({})", set.join(", ")))
            .collect::<Vec<_>>();
        if !examples.is_empty() {
            user.push_str(" like ");
            user.push_str(&examples.join(" or "));
        }

        vec![Message::system(system), Message::user(user)]
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.temperature),
            ..GenerationConfig::default()
        }
    }
}

#[async_trait]
impl CodeSynthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesizedSource, SynthesisError> {
        let unit_name = unit_name_for(request.key.name());
        let provider_request = ProviderRequest::new(
            self.settings.model.clone(),
            self.build_messages(request, &unit_name),
            &self.generation_config(),
        );
        let timeout = self.settings.timeout();

        debug!(
            key = %request.key,
            provider = self.client.provider_name(),
            unit = %unit_name,
            "requesting generated source"
        );

        let pending = self.client.send_request(provider_request);
        let response = match tokio::time::timeout(timeout, pending).await {
            Ok(Ok(response)) => response,
            Ok(Err(LLMError::Timeout)) | Err(_) => {
                warn!(key = %request.key, ?timeout, "code generation timed out");
                return Err(SynthesisError::TimedOut(timeout));
            }
            Ok(Err(err)) => {
                warn!(key = %request.key, error = %err, "code generation failed");
                return Err(SynthesisError::Provider(err.to_string()));
            }
        };

        let source = normalize_wat(&response.content);
        if source.is_empty() {
            return Err(SynthesisError::Empty);
        }

        let metrics = SourceMetrics::analyze(&source);
        debug!(
            key = %request.key,
            unit = %unit_name,
            model = %response.model,
            funcs = metrics.funcs,
            exports = metrics.exports,
            imports = metrics.imports,
            loops = metrics.loops,
            arithmetic_ops = metrics.arithmetic_ops,
            bytes = metrics.length_bytes,
            "generated source"
        );

        Ok(SynthesizedSource { unit_name, source })
    }
}

/// `op_<name>_<8 hex>`, with anything outside `[A-Za-z0-9_]` replaced by `_`.
pub fn unit_name_for(name: &str) -> String {
    let sanitised: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("op_{sanitised}_{}", &suffix[..8])
}
