//! OpenRouter client against a mocked chat-completions endpoint.

use app_config::types::OracleSettings;
use core_types::{Bias, OracleReading, Symbol};
use oracle::{MarketOracle, OpenRouterOracle, OracleRequest};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer, max_attempts: u32) -> OracleSettings {
    OracleSettings {
        api_key: "or-key".into(),
        base_url: format!("{}/api/v1", server.uri()),
        model: "test/model".into(),
        timeout_secs: 5,
        max_reasoning_length: 1000,
        max_attempts,
        temperature: 0.2,
    }
}

fn request() -> OracleRequest {
    OracleRequest {
        symbol: Symbol::new("BTCUSDT"),
        snapshots: BTreeMap::new(),
        price: dec!(50000),
        performance_summary: String::new(),
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "gen-1",
        "model": "test/model",
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
    })
}

#[tokio::test]
async fn assessment_is_parsed_from_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(header("authorization", "Bearer or-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "test/model",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"bias": "SHORT", "confidence": 0.72, "reasoning": "lower highs"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = OpenRouterOracle::new(settings(&server, 3)).unwrap();
    let reading = oracle.assess(&request()).await;
    let a = reading.assessment().expect("assessment");
    assert_eq!(a.bias, Bias::Short);
    assert_eq!(a.confidence, 0.72);
    assert_eq!(a.rationale, "lower highs");
}

#[tokio::test]
async fn persistent_errors_become_failed_reading() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = OpenRouterOracle::new(settings(&server, 1)).unwrap();
    match oracle.assess(&request()).await {
        OracleReading::Failed { reason } => assert!(reason.contains("500")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_answers_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("I am not sure.")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"direction": "LONG", "confidence": 0.9}"#,
        )))
        .mount(&server)
        .await;

    let oracle = OpenRouterOracle::new(settings(&server, 2)).unwrap();
    let reading = oracle.assess(&request()).await;
    assert_eq!(reading.assessment().map(|a| a.bias), Some(Bias::Long));
}
