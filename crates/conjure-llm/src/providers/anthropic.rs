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
use serde_json::{json, Value};

use super::ApiClient;
use crate::retry::{http_client, send_with_retry, token_count, RetryPolicy};

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    endpoint: String,
    api_version: String,
    policy: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        api_version: Option<String>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> LLMResult<Self> {
        let timeout_seconds = timeout_seconds.unwrap_or(30);
        Ok(Self {
            client: http_client(timeout_seconds)?,
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string()),
            api_version: api_version.unwrap_or_else(|| "2023-06-01".to_string()),
            policy: RetryPolicy::new(timeout_seconds, max_retries.unwrap_or(2)),
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> LLMResult<Self> {
        Self::new(
            settings.api_key.clone().unwrap_or_default(),
            settings.endpoint.clone(),
            settings.api_version.clone(),
            Some(settings.timeout_seconds),
            Some(settings.max_retries),
        )
    }

    fn build_anthropic_payload(request: &ProviderRequest) -> Value {
        let (system, conversation): (Vec<_>, Vec<_>) =
            request.messages.iter().partition(|m| m.role == "system");

        let mut payload = json!({
            "model": request.model,
            "messages": conversation.iter().map(|m| json!({
                "role": m.role,
                "content": m.content
            })).collect::<Vec<_>>(),
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });

        if !system.is_empty() {
            payload["system"] = json!(system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop_sequences {
            payload["stop_sequences"] = json!(stop);
        }
        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }
        payload
    }

    fn parse_anthropic_response(response_data: Value, model: String) -> LLMResult<ProviderResponse> {
        let content = response_data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from Anthropic response".to_string())
            })?;

        let usage = response_data.get("usage").map_or_else(Usage::default, |u| {
            Usage::new(token_count(&u["input_tokens"]), token_count(&u["output_tokens"]))
        });

        Ok(ProviderResponse {
            content,
            model,
            usage,
            finish_reason: response_data["stop_reason"].as_str().map(ToString::to_string),
            raw_response: response_data,
        })
    }
}

#[async_trait]
impl ApiClient for AnthropicClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = Self::build_anthropic_payload(&request);
        let response_data = send_with_retry(self.provider_name(), self.policy, || {
            self.client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.api_version)
                .header("content-type", "application/json")
                .json(&payload)
        })
        .await?;
        Self::parse_anthropic_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}
