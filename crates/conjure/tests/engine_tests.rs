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
use conjure::{
    EngineConfig, EngineError, ExecutionEngine, InvocationError, OperationKey, ParamType, Phase,
    SynthesisError, Value,
};
use conjure_llm::ApiClient;
use llm_contracts::{LLMError, LLMResult, ProviderRequest, ProviderResponse, Usage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ADD_WAT: &str = r#"(module
  (func $op_add (export "op_add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add))"#;

const TWO_FUNCS_WAT: &str = r#"(module
  (func (export "add_a") (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)
  (func (export "add_b") (param i32 i32) (result i32) local.get 1 local.get 0 i32.add))"#;

const DIV_WAT: &str = r#"(module
  (func (export "op_div") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.div_s))"#;

const COUNT_WAT: &str = r#"(module
  (func (export "op_count") (param i32) (result i32) (local i32)
    (block $done
      (loop $next
        local.get 1
        local.get 0
        i32.ge_s
        br_if $done
        local.get 1
        i32.const 1
        i32.add
        local.set 1
        br $next))
    local.get 1))"#;

/// Replays canned completions in order, repeating the last one once the
/// script runs out.
struct ScriptedClient {
    script: Mutex<VecDeque<LLMResult<String>>>,
    last: Mutex<Option<LLMResult<String>>>,
    delay: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedClient {
    fn new(script: Vec<LLMResult<String>>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    fn with_delay(script: Vec<LLMResult<String>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            delay,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn always(source: &str) -> Arc<Self> {
        Self::new(vec![Ok(source.to_string())])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(LLMError::Provider("script exhausted".to_string()))),
            }
        };
        next.map(|content| ProviderResponse {
            content,
            model: request.model,
            usage: Usage::new(10, 20),
            finish_reason: Some("stop".to_string()),
            raw_response: serde_json::Value::Null,
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

fn engine(client: Arc<ScriptedClient>) -> ExecutionEngine {
    engine_with(client, EngineConfig::default())
}

fn engine_with(client: Arc<ScriptedClient>, config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::with_client(client, config).unwrap()
}

fn add_key() -> OperationKey {
    OperationKey::new("math", "add")
}

#[tokio::test]
async fn test_first_call_implements_and_second_reuses() {
    let client = ScriptedClient::always(ADD_WAT);
    let engine = engine(Arc::clone(&client));
    let key = add_key();

    assert!(!engine.is_implemented(&key));
    assert_eq!(engine.execute(&key, &["3", "4"]).await.unwrap(), Value::Int32(7));
    assert!(engine.is_implemented(&key));

    assert_eq!(engine.execute(&key, &["10", "20"]).await.unwrap(), Value::Int32(30));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_prompt_encodes_key_arity_and_examples() {
    let client = ScriptedClient::always(ADD_WAT);
    let engine = engine(Arc::clone(&client));

    engine.execute(&add_key(), &["3", "4"]).await.unwrap();

    let prompts = client.prompts.lock().unwrap();
    let messages = &prompts[0].messages;
    assert_eq!(messages[0].role, "system");
    assert!(messages[0].content.contains("math operations"));
    assert!(messages[0].content.contains(r#"(import "math" "pow""#));
    assert_eq!(messages[1].role, "user");
    assert!(messages[1].content.starts_with("Generate a add function named $op_add_"));
    assert!(messages[1].content.contains("accepts 2 parameters like (3, 4)"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_synthesizes_once() {
    let client = ScriptedClient::with_delay(vec![Ok(ADD_WAT.to_string())], Duration::from_millis(100));
    let engine = engine(Arc::clone(&client));

    let mut handles = Vec::new();
    for i in 0..12 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let args = [i.to_string(), "1".to_string()];
            (i, engine.execute(&add_key(), &args).await)
        }));
    }
    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.unwrap(), Value::Int32(i + 1));
    }

    assert_eq!(client.calls(), 1);
    assert_eq!(engine.registry().len(), 1);
}

#[tokio::test]
async fn test_two_callable_units_fail_resolution_then_retry_succeeds() {
    let client = ScriptedClient::new(vec![Ok(TWO_FUNCS_WAT.to_string()), Ok(ADD_WAT.to_string())]);
    let engine = engine(Arc::clone(&client));
    let key = add_key();

    let err = engine.execute(&key, &["3", "4"]).await.unwrap_err();
    assert!(matches!(err, EngineError::Resolution { .. }), "{err:?}");
    assert_eq!(err.phase(), Phase::Implementing);
    assert!(err.is_retriable());
    assert!(!engine.is_implemented(&key));

    assert_eq!(engine.execute(&key, &["3", "4"]).await.unwrap(), Value::Int32(7));
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_unparseable_source_is_a_compilation_error() {
    let client = ScriptedClient::new(vec![
        Ok("(module (func (export \"op_add\") (param i32 i32".to_string()),
        Ok(ADD_WAT.to_string()),
    ]);
    let engine = engine(client);
    let key = add_key();

    let err = engine.implement(&key, 2, vec![]).await.unwrap_err();
    match &err {
        EngineError::Compilation { key: failed, diagnostics } => {
            assert_eq!(failed, &key);
            assert!(!diagnostics.is_empty());
        }
        other => panic!("expected compilation error, got {other:?}"),
    }
    assert!(!engine.is_implemented(&key));

    let record = engine.implement(&key, 2, vec![]).await.unwrap();
    assert_eq!(record.param_types(), &[ParamType::Int32, ParamType::Int32]);
}

#[tokio::test]
async fn test_provider_failure_is_a_synthesis_error() {
    let client = ScriptedClient::new(vec![Err(LLMError::Network("connection refused".to_string()))]);
    let engine = engine(client);

    let err = engine.execute(&add_key(), &["1", "2"]).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Synthesis {
            source: SynthesisError::Provider(_),
            ..
        }
    ));
    assert_eq!(err.kind(), "synthesis");
    assert!(!engine.is_implemented(&add_key()));
}

#[tokio::test]
async fn test_empty_completion_is_a_synthesis_error() {
    let client = ScriptedClient::new(vec![Ok("```wat\n```".to_string())]);
    let engine = engine(client);

    let err = engine.implement(&add_key(), 2, vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Synthesis {
            source: SynthesisError::Empty,
            ..
        }
    ));
}

#[tokio::test]
async fn test_synthesis_timeout_reverts_key() {
    let client = ScriptedClient::with_delay(vec![Ok(ADD_WAT.to_string())], Duration::from_secs(3));
    let mut config = EngineConfig::default();
    config.synthesis.timeout_secs = 1;
    let engine = engine_with(client, config);
    let key = add_key();

    let err = engine.execute(&key, &["3", "4"]).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Synthesis {
            source: SynthesisError::TimedOut(_),
            ..
        }
    ));
    assert!(!engine.is_implemented(&key));
    assert!(!engine.registry().is_pending(&key));
}

#[tokio::test]
async fn test_resolved_arity_must_match_request() {
    let client = ScriptedClient::always(ADD_WAT);
    let engine = engine(client);

    let err = engine
        .implement(&add_key(), 3, vec![vec!["1".into(), "2".into(), "3".into()]])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Resolution { ref reason, .. } if reason.contains("expected 3")));
    assert!(!engine.is_implemented(&add_key()));
}

#[tokio::test]
async fn test_caller_errors_leave_registry_untouched() {
    let client = ScriptedClient::always(ADD_WAT);
    let engine = engine(Arc::clone(&client));
    let key = add_key();
    engine.execute(&key, &["1", "1"]).await.unwrap();

    let err = engine.execute(&key, &["abc", "4"]).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Coercion {
            key: key.clone(),
            index: 0,
            raw: "abc".to_string(),
            target: ParamType::Int32,
        }
    );
    assert_eq!(err.phase(), Phase::Executing);
    assert!(!err.is_retriable());

    let err = engine.execute(&key, &["1"]).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::ArityMismatch {
            key: key.clone(),
            expected: 2,
            actual: 1,
        }
    );

    assert!(engine.is_implemented(&key));
    assert_eq!(client.calls(), 1);
    assert_eq!(engine.execute(&key, &["2", "2"]).await.unwrap(), Value::Int32(4));
}

#[tokio::test]
async fn test_trap_in_generated_code_is_reported_not_retried() {
    let client = ScriptedClient::always(DIV_WAT);
    let engine = engine(Arc::clone(&client));
    let key = OperationKey::new("math", "div");

    assert_eq!(engine.execute(&key, &["9", "3"]).await.unwrap(), Value::Int32(3));
    let err = engine.execute(&key, &["1", "0"]).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Invocation {
            source: InvocationError::Trap(_),
            ..
        }
    ));
    assert!(engine.is_implemented(&key));
    assert_eq!(client.calls(), 1);

    let summary = &engine.operations()[0];
    assert_eq!(summary.metrics.total_calls, 2);
    assert_eq!(summary.metrics.error_count, 1);
}

#[tokio::test]
async fn test_operations_lists_implemented_keys() {
    let client = ScriptedClient::always(ADD_WAT);
    let engine = engine(client);
    assert!(engine.operations().is_empty());

    engine.execute(&OperationKey::new("math", "plus"), &["1", "2"]).await.unwrap();
    engine.execute(&add_key(), &["1", "2"]).await.unwrap();

    let ops = engine.operations();
    let names = ops.iter().map(|s| s.operation.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["add", "plus"]);
    assert_eq!(ops[0].param_types, vec![ParamType::Int32, ParamType::Int32]);
    assert_eq!(ops[0].result_type, Some(ParamType::Int32));
    assert!(ops[0].unit_name.starts_with("op_add_"));
    assert_eq!(ops[0].entry_point, "op_add");
}

#[tokio::test]
async fn test_fenced_completion_is_normalised_before_compiling() {
    let fenced = format!("Here is the module:\n```wat\n{ADD_WAT}\n```\nIt adds two numbers.");
    let client = ScriptedClient::always(&fenced);
    let engine = engine(client);

    assert_eq!(engine.execute(&add_key(), &["5", "6"]).await.unwrap(), Value::Int32(11));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invocation_timeout_counts_as_failed_call() {
    let client = ScriptedClient::always(COUNT_WAT);
    let mut config = EngineConfig::default();
    config.sandbox.fuel = 1_000_000_000_000;
    config.invocation.timeout_ms = 20;
    let engine = engine_with(client, config);
    let key = OperationKey::new("math", "count");

    assert_eq!(engine.execute(&key, &["10"]).await.unwrap(), Value::Int32(10));

    let err = engine.execute(&key, &["300000000"]).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Invocation {
            source: InvocationError::TimedOut(_),
            ..
        }
    ));

    let metrics = &engine.operations()[0].metrics;
    assert_eq!(metrics.total_calls, 2);
    assert_eq!(metrics.error_count, 1);
}
