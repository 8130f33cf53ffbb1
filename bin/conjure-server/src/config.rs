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

use anyhow::{bail, Context, Result};
use conjure::EngineConfig;
use llm_contracts::{ProviderKind, ProviderSettings};
use std::net::SocketAddr;

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5-coder";

/// Everything the server needs at start-up, read from the process environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Categories exposed as route prefixes.
    pub categories: Vec<String>,
    pub provider: ProviderSettings,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let addr = var("CONJURE_HTTP_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("CONJURE_HTTP_ADDR is not a socket address")?;

        let categories = var("CONJURE_CATEGORIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec!["math".to_string()]);
        if categories.is_empty() {
            bail!("CONJURE_CATEGORIES names no categories");
        }

        let mut engine = EngineConfig::default();
        let provider = provider_settings(&var, &engine.synthesis.model)?;
        engine.synthesis.model = provider.model.clone();

        Ok(Self {
            addr,
            categories,
            provider,
            engine,
        })
    }
}

fn provider_settings<F>(var: &F, default_model: &str) -> Result<ProviderSettings>
where
    F: Fn(&str) -> Option<String>,
{
    // Azure when its resource and deployment are both present, as deployed
    // environments usually only set those.
    let kind = match var("CONJURE_LLM_PROVIDER") {
        Some(raw) => raw
            .parse::<ProviderKind>()
            .map_err(|e| anyhow::anyhow!("CONJURE_LLM_PROVIDER: {e}"))?,
        None if var("OPENAI_URI").is_some() && azure_deployment(var).is_some() => {
            ProviderKind::Azure
        }
        None => ProviderKind::OpenAI,
    };

    let settings = match kind {
        ProviderKind::OpenAI => {
            let mut s = ProviderSettings::new(
                kind,
                var("OPENAI_MODEL").unwrap_or_else(|| default_model.to_string()),
            );
            s.endpoint = var("OPENAI_URI");
            s.api_key = var("OPENAI_API_KEY");
            s
        }
        ProviderKind::Azure => {
            let deployment = azure_deployment(var)
                .context("OPENAI_DEPLOYMENT is required for the azure provider")?;
            let mut s = ProviderSettings::new(kind, deployment);
            let resource = var("OPENAI_URI")
                .context("OPENAI_URI is required for the azure provider")?;
            s.endpoint = Some(resource);
            s.api_key = var("OPENAI_API_KEY");
            s
        }
        ProviderKind::Anthropic => {
            let mut s = ProviderSettings::new(
                kind,
                var("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            );
            s.api_key = var("ANTHROPIC_API_KEY");
            s
        }
        ProviderKind::Ollama => {
            let mut s = ProviderSettings::new(
                kind,
                var("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            );
            s.endpoint = var("OLLAMA_ENDPOINT");
            s
        }
    };
    Ok(settings)
}

/// `OPENAI_DEPOYMENT` is a misspelling found in older deployments; accepted
/// when the correct name is unset.
fn azure_deployment<F>(var: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    var("OPENAI_DEPLOYMENT").or_else(|| var("OPENAI_DEPOYMENT"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_openai_on_localhost() {
        let cfg = config(&[("OPENAI_API_KEY", "sk")]).unwrap();
        assert_eq!(cfg.addr.to_string(), DEFAULT_HTTP_ADDR);
        assert_eq!(cfg.categories, vec!["math"]);
        assert_eq!(cfg.provider.kind, ProviderKind::OpenAI);
        assert_eq!(cfg.provider.model, "gpt-4o-mini");
        assert_eq!(cfg.engine.synthesis.model, "gpt-4o-mini");
    }

    #[test]
    fn azure_inferred_from_uri_and_deployment() {
        let cfg = config(&[
            ("OPENAI_URI", "https://res.openai.azure.com"),
            ("OPENAI_DEPLOYMENT", "codegen"),
            ("OPENAI_API_KEY", "k"),
        ])
        .unwrap();
        assert_eq!(cfg.provider.kind, ProviderKind::Azure);
        assert_eq!(cfg.provider.model, "codegen");
        assert_eq!(cfg.engine.synthesis.model, "codegen");
        assert_eq!(cfg.provider.endpoint.as_deref(), Some("https://res.openai.azure.com"));
    }

    #[test]
    fn misspelled_deployment_variable_still_selects_azure() {
        let cfg = config(&[
            ("OPENAI_URI", "https://res.openai.azure.com"),
            ("OPENAI_DEPOYMENT", "legacy-codegen"),
            ("OPENAI_API_KEY", "k"),
        ])
        .unwrap();
        assert_eq!(cfg.provider.kind, ProviderKind::Azure);
        assert_eq!(cfg.provider.model, "legacy-codegen");

        let cfg = config(&[
            ("OPENAI_URI", "https://res.openai.azure.com"),
            ("OPENAI_DEPLOYMENT", "codegen"),
            ("OPENAI_DEPOYMENT", "legacy-codegen"),
        ])
        .unwrap();
        assert_eq!(cfg.provider.model, "codegen");
    }

    #[test]
    fn explicit_azure_requires_deployment() {
        let err = config(&[("CONJURE_LLM_PROVIDER", "azure"), ("OPENAI_URI", "https://x")])
            .unwrap_err();
        assert!(err.to_string().contains("OPENAI_DEPLOYMENT"));
    }

    #[test]
    fn categories_are_split_and_trimmed() {
        let cfg = config(&[("CONJURE_CATEGORIES", " math, text ,,")]).unwrap();
        assert_eq!(cfg.categories, vec!["math", "text"]);
    }

    #[test]
    fn ollama_needs_no_key() {
        let cfg = config(&[
            ("CONJURE_LLM_PROVIDER", "ollama"),
            ("OLLAMA_ENDPOINT", "http://gpu-box:11434"),
        ])
        .unwrap();
        assert_eq!(cfg.provider.kind, ProviderKind::Ollama);
        assert_eq!(cfg.provider.model, DEFAULT_OLLAMA_MODEL);
        assert!(!cfg.provider.requires_api_key());
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(config(&[("CONJURE_HTTP_ADDR", "not-an-addr")]).is_err());
    }
}
