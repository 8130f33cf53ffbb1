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

use conjure::{
    CodeSynthesizer, EngineConfig, ExecutionEngine, LlmSynthesizer, OperationKey,
    SynthesisError, SynthesisRequest, SynthesisSettings, Value,
};
use conjure_llm::{ApiClient, OpenAIClient};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MUL_WAT: &str = "(module (func $m (export \"op_mul\") (param f64 f64) (result f64) local.get 0 local.get 1 f64.mul))";

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 40, "completion_tokens": 30, "total_tokens": 70}
    }))
}

fn client_for(server: &MockServer) -> Arc<dyn ApiClient> {
    Arc::new(
        OpenAIClient::new(
            "sk-test".into(),
            Some(format!("{}/v1/chat/completions", server.uri())),
            Some(5),
            Some(0),
        )
        .unwrap(),
    )
}

fn mul_request() -> SynthesisRequest {
    SynthesisRequest::new(
        OperationKey::new("math", "mul"),
        2,
        vec![
            vec!["3".to_string(), "4".to_string()],
            vec!["10".to_string(), "20".to_string()],
        ],
    )
}

#[tokio::test]
async fn test_messages_are_deterministic_for_a_unit_name() {
    let server = MockServer::start().await;
    let synthesizer = LlmSynthesizer::new(client_for(&server), SynthesisSettings::default())
        .with_references(vec!["(import \"math\" \"exp\" (func (param f64) (result f64)))".into()]);

    let a = synthesizer.build_messages(&mul_request(), "op_mul_0000abcd");
    let b = synthesizer.build_messages(&mul_request(), "op_mul_0000abcd");
    assert_eq!(a, b);
    assert!(a[0].content.contains("math operations"));
    assert!(a[0].content.contains("(import \"math\" \"exp\""));
    assert_eq!(
        a[1].content,
        "Generate a mul function named $op_mul_0000abcd exported as \"op_mul_0000abcd\" \
         that accepts 2 parameters like (3, 4) or (10, 20)"
    );
}

#[tokio::test]
async fn test_without_references_prompt_forbids_imports() {
    let server = MockServer::start().await;
    let synthesizer = LlmSynthesizer::new(client_for(&server), SynthesisSettings::default());
    let messages = synthesizer.build_messages(&mul_request(), "op_mul_1");
    assert!(messages[0].content.contains("must not declare any imports"));
}

#[tokio::test]
async fn test_synthesis_over_http_strips_fences() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Generate a mul function"))
        .respond_with(completion(&format!("```wat\n{MUL_WAT}\n```")))
        .expect(1)
        .mount(&server)
        .await;

    let synthesizer = LlmSynthesizer::new(client_for(&server), SynthesisSettings::default());
    let generated = synthesizer.synthesize(&mul_request()).await.unwrap();
    assert_eq!(generated.source, MUL_WAT);
    assert!(generated.unit_name.starts_with("op_mul_"));
}

#[tokio::test]
async fn test_each_attempt_gets_a_fresh_unit_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(MUL_WAT))
        .expect(2)
        .mount(&server)
        .await;

    let synthesizer = LlmSynthesizer::new(client_for(&server), SynthesisSettings::default());
    let first = synthesizer.synthesize(&mul_request()).await.unwrap();
    let second = synthesizer.synthesize(&mul_request()).await.unwrap();
    assert_ne!(first.unit_name, second.unit_name);
}

#[tokio::test]
async fn test_blank_completion_is_empty_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("   "))
        .mount(&server)
        .await;

    let synthesizer = LlmSynthesizer::new(client_for(&server), SynthesisSettings::default());
    let err = synthesizer.synthesize(&mul_request()).await.unwrap_err();
    assert_eq!(err, SynthesisError::Empty);
}

#[tokio::test]
async fn test_provider_rejection_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let synthesizer = LlmSynthesizer::new(client_for(&server), SynthesisSettings::default());
    let err = synthesizer.synthesize(&mul_request()).await.unwrap_err();
    assert!(matches!(err, SynthesisError::Provider(_)));
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion(MUL_WAT).set_delay(std::time::Duration::from_secs(3)))
        .mount(&server)
        .await;

    let settings = SynthesisSettings {
        timeout_secs: 1,
        ..SynthesisSettings::default()
    };
    let synthesizer = LlmSynthesizer::new(client_for(&server), settings);
    let err = synthesizer.synthesize(&mul_request()).await.unwrap_err();
    assert!(matches!(err, SynthesisError::TimedOut(_)));
}

#[tokio::test]
async fn test_json_envelope_runs_end_to_end() {
    let server = MockServer::start().await;
    let envelope = json!({ "wat": MUL_WAT }).to_string();
    Mock::given(method("POST"))
        .respond_with(completion(&envelope))
        .expect(1)
        .mount(&server)
        .await;

    let engine = ExecutionEngine::with_client(client_for(&server), EngineConfig::default()).unwrap();
    let key = OperationKey::new("math", "mul");
    assert_eq!(
        engine.execute(&key, &["2.5", "4"]).await.unwrap(),
        Value::Float64(10.0)
    );
    assert_eq!(
        engine.execute(&key, &["3", "3"]).await.unwrap(),
        Value::Float64(9.0)
    );
}
