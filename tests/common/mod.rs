//! Shared helpers for integration tests against a local mock server.

#![allow(dead_code)]

use std::time::Duration;

use modelscope_client::{ModelScopeClient, QueueConfig, RetryConfig};
use serde_json::json;
use wiremock::{MockServer, ResponseTemplate};

pub const TEST_API_KEY: &str = "ms-integration-test-key";

/// Short, jitter-free delays so retry tests finish quickly.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new()
        .max_retries(max_retries)
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
        .jitter_fraction(0.0)
        .min_delay_floor(Duration::ZERO)
        .attempt_timeout(Duration::from_secs(5))
}

/// A client talking to `server` over the real HTTP transport.
pub fn client_for(server: &MockServer, max_retries: u32) -> ModelScopeClient {
    ModelScopeClient::builder()
        .api_key(TEST_API_KEY)
        .base_url(server.uri())
        .retry(fast_retry(max_retries))
        .queue(QueueConfig::new().min_interval(Duration::ZERO))
        .stream_timeout(Duration::from_secs(5))
        .build()
        .expect("client should build against a loopback server")
}

/// An event stream body carrying `fragments`, then the sentinel.
pub fn sse_body(fragments: &[&str]) -> String {
    let mut body: String = fragments
        .iter()
        .map(|f| {
            format!(
                "data: {}\n\n",
                json!({"choices": [{"index": 0, "delta": {"content": f}}]})
            )
        })
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

pub fn sse_response(fragments: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse_body(fragments), "text/event-stream")
}

pub fn error_response(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": {"message": message, "type": "error"}
    }))
}

pub fn chat_response(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-it",
        "model": "ZhipuAI/GLM-4.7-Flash",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    }))
}
