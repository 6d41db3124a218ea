//! Service implementations for the ModelScope inference API.
//!
//! Provides streaming and non-streaming chat completions and the
//! asynchronous image generation workflow.

mod chat;
mod images;

pub use chat::{ChatEvent, ChatService, ChatStream};
pub use images::ImageService;

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::config::ModelScopeConfig;
use crate::errors::{ModelScopeError, ModelScopeResult};
use crate::observability::{ClientMetrics, LogConfig};
use crate::resilience::ResilienceOrchestrator;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Everything a service needs to issue a request.
#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) resilience: Arc<ResilienceOrchestrator>,
    pub(crate) metrics: Arc<ClientMetrics>,
    pub(crate) config: Arc<ModelScopeConfig>,
    pub(crate) log_config: LogConfig,
}

impl ServiceContext {
    /// Custom headers plus credentials.
    pub(crate) fn base_headers(&self) -> HashMap<String, String> {
        let mut headers: HashMap<String, String> =
            self.config.custom_headers.iter().cloned().collect();
        self.auth.apply_auth(&mut headers);
        headers
    }

    /// Sends a buffered request, turning a non-success status into the
    /// matching error so the retry engine can classify it.
    pub(crate) async fn send_checked(&self, request: HttpRequest) -> ModelScopeResult<HttpResponse> {
        let path = request.path.clone();
        let response = self.transport.send(request).await?;

        if response.is_success() {
            return Ok(response);
        }

        Err(self.rejection(&path, response.status, &response.headers, &response.body))
    }

    /// Builds and logs the error for a rejected request.
    pub(crate) fn rejection(
        &self,
        path: &str,
        status: u16,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> ModelScopeError {
        let error = ModelScopeError::from_status(status, headers, body);
        tracing::warn!(
            path,
            status,
            retryable = error.is_retryable(),
            body = %self.log_config.loggable_body(&String::from_utf8_lossy(body)),
            "Request rejected"
        );
        error
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
