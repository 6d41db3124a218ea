//! Mock implementations for testing.
//!
//! Provides a scripted transport and auth provider for unit testing
//! without making real API calls.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::auth::AuthProvider;
use crate::errors::ModelScopeError;
use crate::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, StreamingResponse, TransportError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock HTTP transport for testing.
///
/// Responses are consumed in the order they were queued; when the queue is
/// empty the default response is used.
pub struct MockTransport {
    responses: Mutex<Vec<MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    default_response: Mutex<Option<MockResponse>>,
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path.
    pub path: String,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    /// Parses the recorded body as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// A scripted response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Body chunks, delivered one per stream item.
    pub chunks: Vec<Vec<u8>>,
    /// Pause before each chunk is delivered.
    pub chunk_delay: Option<Duration>,
    /// Pause before the headers arrive.
    pub delay: Option<Duration>,
    /// Body read error raised after the last chunk.
    pub stream_error: Option<String>,
    /// Fail the request itself with a connection error.
    pub connection_error: Option<String>,
}

impl MockResponse {
    fn new(status: u16, content_type: &str, chunks: Vec<Vec<u8>>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self {
            status,
            headers,
            chunks,
            chunk_delay: None,
            delay: None,
            stream_error: None,
            connection_error: None,
        }
    }

    /// Creates a successful JSON response.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(200, "application/json", vec![body])
    }

    /// Creates an error response with a JSON error body.
    pub fn error(status: u16, message: &str) -> Self {
        let error = serde_json::json!({
            "error": {
                "message": message,
                "type": "error"
            }
        });
        let body = serde_json::to_vec(&error).unwrap_or_default();
        Self::new(status, "application/json", vec![body])
    }

    /// Creates an event stream response with one chunk per fragment,
    /// terminated by the sentinel.
    pub fn sse(fragments: &[&str]) -> Self {
        Self::sse_chunks(vec![fixtures::sse_body(fragments).into_bytes()])
    }

    /// Creates an event stream response from raw chunks, no sentinel added.
    pub fn sse_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self::new(200, mime::TEXT_EVENT_STREAM.as_ref(), chunks)
    }

    /// Creates an event stream that delivers `fragments` and then breaks.
    pub fn sse_broken(fragments: &[&str], error: &str) -> Self {
        let chunks = fragments
            .iter()
            .map(|f| fixtures::sse_line(f).into_bytes())
            .collect();
        Self::sse_chunks(chunks).with_stream_error(error)
    }

    /// Creates a response whose request fails before any status arrives.
    pub fn connection_error(message: &str) -> Self {
        let mut response = Self::new(0, "text/plain", Vec::new());
        response.connection_error = Some(message.to_string());
        response
    }

    /// Creates a response with custom status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Delays the response headers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delays every body chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Breaks the body after the last chunk.
    pub fn with_stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    fn body(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            default_response: Mutex::new(None),
        }
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) {
        lock(&self.responses).push(response);
    }

    /// Queues a JSON response.
    pub fn queue_json<T: serde::Serialize>(&self, value: &T) {
        self.queue(MockResponse::json(value));
    }

    /// Queues an error response.
    pub fn queue_error(&self, status: u16, message: &str) {
        self.queue(MockResponse::error(status, message));
    }

    /// Sets the default response.
    pub fn set_default(&self, response: MockResponse) {
        *lock(&self.default_response) = Some(response);
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Gets the last recorded request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Returns the number of requests made.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_response(&self, request: &HttpRequest) -> MockResponse {
        lock(&self.requests).push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            body: request.body.clone(),
            headers: request.headers.clone(),
        });

        let mut responses = lock(&self.responses);
        if responses.is_empty() {
            lock(&self.default_response)
                .clone()
                .unwrap_or_else(|| MockResponse::error(500, "No mock response configured"))
        } else {
            responses.remove(0)
        }
    }

    async fn respond(&self, request: &HttpRequest) -> Result<MockResponse, TransportError> {
        let response = self.next_response(request);

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        match &response.connection_error {
            Some(message) => Err(TransportError::Connection {
                message: message.clone(),
            }),
            None => Ok(response),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.respond(&request).await?;

        if let Some(message) = response.stream_error {
            return Err(TransportError::Body { message });
        }

        Ok(HttpResponse {
            status: response.status,
            body: response.body(),
            headers: response.headers,
        })
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let MockResponse {
            status,
            headers,
            chunks,
            chunk_delay,
            stream_error,
            ..
        } = self.respond(&request).await?;

        let stream = async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(Bytes::from(chunk));
            }
            if let Some(message) = stream_error {
                yield Err(TransportError::Body { message });
            }
        };

        Ok(StreamingResponse {
            status,
            headers,
            stream: Box::pin(stream),
        })
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("request_count", &self.request_count())
            .finish()
    }
}

/// Mock auth provider for testing.
pub struct MockAuth {
    api_key: String,
}

impl MockAuth {
    /// Creates a new mock auth provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl Default for MockAuth {
    fn default() -> Self {
        Self::new("ms-mock-test-key")
    }
}

impl AuthProvider for MockAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) {
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
    }

    fn scheme(&self) -> &str {
        "Bearer"
    }

    fn validate(&self) -> Result<(), ModelScopeError> {
        Ok(())
    }
}

impl std::fmt::Debug for MockAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAuth").finish()
    }
}

/// Test fixtures for common response bodies.
pub mod fixtures {
    use serde_json::{json, Value};

    /// One `data:` line carrying a content delta.
    pub fn sse_line(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    /// A full event stream body for `fragments`, ending with the sentinel.
    pub fn sse_body(fragments: &[&str]) -> String {
        let mut body: String = fragments.iter().map(|f| sse_line(f)).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    /// A non-streaming chat completion.
    pub fn chat_response(content: &str) -> Value {
        json!({
            "id": "chatcmpl-mock",
            "model": "ZhipuAI/GLM-4.7-Flash",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    /// An accepted image task.
    pub fn task_submission(task_id: &str) -> Value {
        json!({"task_id": task_id, "request_id": "req-mock"})
    }

    /// A task status report.
    pub fn task_status(status: &str, images: &[&str]) -> Value {
        if images.is_empty() {
            json!({"task_status": status})
        } else {
            json!({"task_status": status, "output_images": images})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_transport_queue() {
        let transport = MockTransport::new();
        transport.queue_json(&serde_json::json!({"test": "value"}));

        let response = transport.send(HttpRequest::get("test")).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(String::from_utf8_lossy(&response.body).contains("value"));
    }

    #[tokio::test]
    async fn test_mock_transport_records_requests() {
        let transport = MockTransport::new();
        transport.set_default(MockResponse::json(&serde_json::json!({})));

        transport.send(HttpRequest::get("path1")).await.unwrap();
        transport
            .send(HttpRequest::post("path2").with_body(b"{\"a\":1}".to_vec()))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, "path1");
        assert_eq!(requests[1].json(), Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_mock_streaming_breaks_after_chunks() {
        let transport = MockTransport::new();
        transport.queue(MockResponse::sse_broken(&["a", "b"], "reset"));

        let response = transport
            .send_streaming(HttpRequest::post("chat/completions"))
            .await
            .unwrap();
        let items: Vec<_> = response.stream.collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[2], Err(TransportError::Body { .. })));
    }

    #[tokio::test]
    async fn test_mock_connection_error() {
        let transport = MockTransport::new();
        transport.queue(MockResponse::connection_error("refused"));

        let result = transport.send(HttpRequest::get("tasks/1")).await;
        assert!(matches!(result, Err(TransportError::Connection { .. })));
        assert_eq!(transport.request_count(), 1);
    }
}
