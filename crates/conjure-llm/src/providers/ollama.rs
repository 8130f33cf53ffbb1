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

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, ProviderRequest, ProviderResponse, ProviderSettings, Usage};
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::ApiClient;
use crate::retry::{http_client, send_with_retry, token_count, RetryPolicy};

/// Client for a local Ollama daemon's `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl OllamaClient {
    pub fn new(
        base_url: Option<String>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> LLMResult<Self> {
        let timeout_seconds = timeout_seconds.unwrap_or(60);
        Ok(Self {
            client: http_client(timeout_seconds)?,
            base_url: base_url
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            policy: RetryPolicy::new(timeout_seconds, max_retries.unwrap_or(1)),
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> LLMResult<Self> {
        Self::new(
            settings.endpoint.clone(),
            Some(settings.timeout_seconds),
            Some(settings.max_retries),
        )
    }

    fn build_ollama_payload(request: &ProviderRequest) -> Value {
        let mut options = Map::new();
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            options.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".into(), json!(top_p));
        }
        if let Some(stop) = &request.stop_sequences {
            options.insert("stop".into(), json!(stop));
        }

        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|msg| {
                json!({
                    "role": msg.role,
                    "content": msg.content
                })
            }).collect::<Vec<_>>(),
            "stream": false
        });
        if !options.is_empty() {
            payload["options"] = Value::Object(options);
        }
        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }
        payload
    }

    fn parse_ollama_response(response_data: Value, model: String) -> LLMResult<ProviderResponse> {
        let content = response_data["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from Ollama response".to_string())
            })?
            .to_string();

        let usage = Usage::new(
            token_count(&response_data["prompt_eval_count"]),
            token_count(&response_data["eval_count"]),
        );
        let finish_reason = response_data["done"]
            .as_bool()
            .filter(|done| *done)
            .map(|_| "stop".to_string());

        Ok(ProviderResponse {
            content,
            model,
            usage,
            finish_reason,
            raw_response: response_data,
        })
    }
}

#[async_trait]
impl ApiClient for OllamaClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = Self::build_ollama_payload(&request);
        let url = format!("{}/api/chat", self.base_url);
        let response_data = send_with_retry(self.provider_name(), self.policy, || {
            self.client
                .post(&url)
                .header("content-type", "application/json")
                .json(&payload)
        })
        .await?;
        Self::parse_ollama_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }
}
