//! Integration tests for the generation client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_concept_scaffolding::agents::ScaffoldingType;
use mcp_concept_scaffolding::config::{LlmConfig, RequestConfig};
use mcp_concept_scaffolding::error::GenerationError;
use mcp_concept_scaffolding::llm::{
    ChatMessage, GenerationClient, GenerationRequest, Generator,
};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> GenerationClient {
    let config = LlmConfig {
        api_key: Some("test-api-key".to_string()),
        base_url: base_url.to_string(),
        ..LlmConfig::default()
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    GenerationClient::new(&config, request_config).expect("Failed to create client")
}

fn create_test_request() -> GenerationRequest {
    GenerationRequest {
        session_id: "session-1".to_string(),
        round: 1,
        system: "You are a conceptual scaffolding agent.".to_string(),
        scaffolding_type: ScaffoldingType::Conceptual,
        seed_template: Some("How does sunlight relate to glucose?".to_string()),
        map_description: "Sunlight --[drives]--> Glucose".to_string(),
        turns: vec![ChatMessage::user("I think sunlight matters for plants")],
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "model": "gpt-4o",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 80, "completion_tokens": 20, "total_tokens": 100}
    })
}

#[cfg(test)]
mod generation_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_generation() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({"model": "gpt-4o", "max_tokens": 500})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("  What happens to the glucose next?  ")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let generated = client.generate(&create_test_request()).await.unwrap();

        assert_eq!(generated.text, "What happens to the glucose next?");
        assert_eq!(generated.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_request_carries_system_prompt_first() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client.generate(&create_test_request()).await.unwrap();

        let received = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages.last().unwrap()["role"], "user");
    }

    #[tokio::test]
    async fn test_retry_uses_fallback_model() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Recovered")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 1);
        let generated = client.generate(&create_test_request()).await.unwrap();

        assert_eq!(generated.text, "Recovered");
        assert_eq!(generated.model, "gpt-4o-mini");
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client.generate(&create_test_request()).await.unwrap_err();

        match err {
            GenerationError::Unavailable { message, retries } => {
                assert!(message.contains("Rate limited"), "got {}", message);
                assert!(message.contains("slow down"));
                assert_eq!(retries, 1);
            }
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client.generate(&create_test_request()).await.unwrap_err();

        assert!(err.to_string().contains("API error: 401"), "got {}", err);
    }

    #[tokio::test]
    async fn test_empty_content_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client.generate(&create_test_request()).await.unwrap_err();

        assert!(err.to_string().contains("no message content"), "got {}", err);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client.generate(&create_test_request()).await.unwrap_err();

        assert!(err.to_string().contains("Failed to parse response"), "got {}", err);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_every_attempt() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client.generate(&create_test_request()).await.unwrap_err();

        assert!(matches!(err, GenerationError::Unavailable { retries: 3, .. }));
    }
}
