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
use llm_contracts::{
    LLMError, LLMResult, ProviderKind, ProviderRequest, ProviderResponse, ProviderSettings, Usage,
};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use super::ApiClient;
use crate::retry::{http_client, send_with_retry, token_count, RetryPolicy};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

#[derive(Debug, Clone)]
enum Auth {
    Bearer(String),
    /// Azure resources authenticate with an `api-key` header.
    ApiKeyHeader(String),
}

/// Chat-completions client for api.openai.com and Azure OpenAI deployments.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    auth: Auth,
    endpoint: String,
    policy: RetryPolicy,
    azure: bool,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> LLMResult<Self> {
        let timeout_seconds = timeout_seconds.unwrap_or(30);
        Ok(Self {
            client: http_client(timeout_seconds)?,
            auth: Auth::Bearer(api_key),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            policy: RetryPolicy::new(timeout_seconds, max_retries.unwrap_or(2)),
            azure: false,
        })
    }

    /// `resource_uri` is the resource root, e.g. `https://my-res.openai.azure.com`.
    pub fn azure(
        api_key: String,
        resource_uri: &str,
        deployment: &str,
        api_version: Option<&str>,
        timeout_seconds: Option<u32>,
        max_retries: Option<u32>,
    ) -> LLMResult<Self> {
        let timeout_seconds = timeout_seconds.unwrap_or(30);
        let endpoint = format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={}",
            resource_uri.trim_end_matches('/'),
            api_version.unwrap_or(DEFAULT_AZURE_API_VERSION)
        );
        Ok(Self {
            client: http_client(timeout_seconds)?,
            auth: Auth::ApiKeyHeader(api_key),
            endpoint,
            policy: RetryPolicy::new(timeout_seconds, max_retries.unwrap_or(2)),
            azure: true,
        })
    }

    pub fn from_settings(settings: &ProviderSettings) -> LLMResult<Self> {
        let api_key = settings.api_key.clone().unwrap_or_default();
        match settings.kind {
            ProviderKind::Azure => {
                let resource = settings.endpoint.as_deref().ok_or_else(|| {
                    LLMError::Configuration("azure provider requires an endpoint".to_string())
                })?;
                Self::azure(
                    api_key,
                    resource,
                    &settings.model,
                    settings.api_version.as_deref(),
                    Some(settings.timeout_seconds),
                    Some(settings.max_retries),
                )
            }
            _ => Self::new(
                api_key,
                settings.endpoint.clone(),
                Some(settings.timeout_seconds),
                Some(settings.max_retries),
            ),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_openai_payload(&self, request: &ProviderRequest) -> Value {
        let mut payload = json!({
            "messages": request.messages.iter().map(|msg| {
                json!({
                    "role": msg.role,
                    "content": msg.content
                })
            }).collect::<Vec<_>>()
        });

        // Azure routes by deployment in the URL and rejects a model field.
        if !self.azure {
            payload["model"] = json!(request.model);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop_sequences {
            payload["stop"] = json!(stop);
        }

        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }

        payload
    }

    fn parse_openai_response(response_data: Value, model: String) -> LLMResult<ProviderResponse> {
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from OpenAI response".to_string())
            })?
            .to_string();

        let usage = response_data.get("usage").map_or_else(Usage::default, |u| {
            Usage::new(
                token_count(&u["prompt_tokens"]),
                token_count(&u["completion_tokens"]),
            )
        });

        let finish_reason = response_data["choices"][0]["finish_reason"]
            .as_str()
            .map(ToString::to_string);

        Ok(ProviderResponse {
            content,
            model,
            usage,
            finish_reason,
            raw_response: response_data,
        })
    }

    fn authorised(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Bearer(key) => builder.header("Authorization", format!("Bearer {key}")),
            Auth::ApiKeyHeader(key) => builder.header("api-key", key),
        }
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_openai_payload(&request);
        let response_data = send_with_retry(self.provider_name(), self.policy, || {
            self.authorised(self.client.post(&self.endpoint))
                .header("Content-Type", "application/json")
                .json(&payload)
        })
        .await?;
        Self::parse_openai_response(response_data, request.model)
    }

    fn provider_name(&self) -> &'static str {
        if self.azure {
            "azure-openai"
        } else {
            "openai"
        }
    }
}
