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

pub mod anthropic;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, ProviderKind, ProviderRequest, ProviderResponse, ProviderSettings};
use std::sync::Arc;

/// A chat-completion backend able to turn a prompt pair into text.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse>;

    fn provider_name(&self) -> &'static str;
}

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

pub fn build_client(settings: &ProviderSettings) -> LLMResult<Arc<dyn ApiClient>> {
    if settings.requires_api_key() && settings.api_key.as_deref().map_or(true, str::is_empty) {
        return Err(LLMError::Configuration(format!(
            "provider '{}' requires an api key",
            settings.kind
        )));
    }
    let client: Arc<dyn ApiClient> = match settings.kind {
        ProviderKind::OpenAI | ProviderKind::Azure => Arc::new(OpenAIClient::from_settings(settings)?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::from_settings(settings)?),
        ProviderKind::Ollama => Arc::new(OllamaClient::from_settings(settings)?),
    };
    Ok(client)
}
