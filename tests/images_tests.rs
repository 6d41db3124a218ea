//! Integration tests for the asynchronous image workflow.

mod common;

use common::{client_for, error_response};
use modelscope_client::{ModelScopeError, TaskStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_submit_then_poll_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .and(header("X-ModelScope-Async-Mode", "true"))
        .and(body_json(json!({
            "model": "Qwen/Qwen-Image-2512",
            "prompt": "a lighthouse at dusk"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-100"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-100"))
        .and(header("X-ModelScope-Task-Type", "image_generation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_status": "PROCESSING"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task_status": "SUCCEED",
            "output_images": ["https://cdn.example.com/t-100.png", "https://cdn.example.com/t-100-b.png"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let images = client.images();

    let task_id = assert_ok!(images.submit("a lighthouse at dusk").await);
    assert_eq!(task_id, "t-100");

    let pending = images.poll(&task_id).await.unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert_eq!(pending.result_url, None);

    let done = images.poll(&task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(
        done.result_url.as_deref(),
        Some("https://cdn.example.com/t-100.png")
    );

    // Served from the finished-task cache.
    let again = images.poll(&task_id).await.unwrap();
    assert_eq!(again, done);

    let metrics = client.metrics();
    assert_eq!(metrics.tasks_submitted, 1);
    assert_eq!(metrics.tasks_polled, 3);
}

#[tokio::test]
async fn test_failed_task_reports_raw_body() {
    let server = MockServer::start().await;
    let raw = r#"{"task_status":"FAILED","errors":{"message":"prompt rejected"}}"#;
    Mock::given(method("GET"))
        .and(path("/tasks/t-9"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(raw, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let task = client.images().poll("t-9").await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some(raw));

    let cached = client.images().poll("t-9").await.unwrap();
    assert_eq!(cached, task);
}

#[tokio::test]
async fn test_poll_retries_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-5"))
        .respond_with(error_response(502, "bad gateway"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/t-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_status": "RUNNING"})))
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let task = client.images().poll("t-5").await.unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_submit_rejected_key_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(error_response(401, "Invalid API key"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let result = client.images().submit("anything").await;

    assert!(matches!(
        result,
        Err(ModelScopeError::Authentication {
            status_code: 401,
            ..
        })
    ));
}

#[tokio::test]
async fn test_empty_inputs_never_reach_the_network() {
    let server = MockServer::start().await;
    let client = client_for(&server, 2);

    assert!(matches!(
        client.images().submit("").await,
        Err(ModelScopeError::Validation { .. })
    ));
    assert!(matches!(
        client.images().poll("").await,
        Err(ModelScopeError::Validation { .. })
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}
