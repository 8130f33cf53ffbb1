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

use llm_contracts::{LLMError, LLMResult};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(timeout_seconds: u32, max_retries: u32) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds.into()),
            max_retries,
            backoff: Duration::from_millis(500),
        }
    }

    fn wait_before(&self, attempt: u32) -> Duration {
        self.backoff * 2_u32.pow(attempt.min(3))
    }
}

pub(crate) fn http_client(timeout_seconds: u32) -> LLMResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds.into()))
        .build()
        .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Sends the request built by `build` until it succeeds, a non-retriable
/// status comes back, or the retry budget is spent.
pub(crate) async fn send_with_retry<F>(
    provider: &'static str,
    policy: RetryPolicy,
    build: F,
) -> LLMResult<Value>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        debug!(provider, attempt = attempt + 1, "sending completion request");

        match tokio::time::timeout(policy.timeout, build().send()).await {
            Ok(Ok(resp)) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.json::<Value>().await.map_err(|e| {
                        LLMError::Serialisation(format!("Failed to parse response: {e}"))
                    });
                }
                let body = resp.text().await.unwrap_or_default();
                match status {
                    StatusCode::TOO_MANY_REQUESTS => {
                        warn!(provider, "rate limited");
                        last_error = Some(LLMError::RateLimit);
                    }
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        return Err(LLMError::Authentication(format!(
                            "{provider} API error {status}: {body}"
                        )));
                    }
                    s if s.is_client_error() => {
                        return Err(LLMError::Provider(format!(
                            "{provider} API error {status}: {body}"
                        )));
                    }
                    _ => {
                        last_error = Some(LLMError::Provider(format!(
                            "{provider} API error {status}: {body}"
                        )));
                    }
                }
            }
            Ok(Err(e)) => {
                last_error = Some(LLMError::Network(format!("Request failed: {e}")));
            }
            Err(_) => {
                warn!(provider, timeout_secs = policy.timeout.as_secs(), "request timed out");
                last_error = Some(LLMError::Timeout);
            }
        }

        if attempt < policy.max_retries {
            tokio::time::sleep(policy.wait_before(attempt)).await;
        }
    }

    Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
}

pub(crate) fn token_count(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}
