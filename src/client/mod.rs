//! ModelScope API client.
//!
//! Wires configuration, transport, credentials and the shared resilience
//! layer into the chat and image services.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ApiKeyAuth, AuthProvider};
use crate::config::{ModelScopeConfig, ModelScopeConfigBuilder};
use crate::errors::{ModelScopeError, ModelScopeResult};
use crate::observability::{ClientMetrics, LogConfig, MetricsSnapshot};
use crate::resilience::{
    Attempt, AttemptObserver, QueueConfig, RequestQueue, ResilienceOrchestrator, RetryConfig,
    RetryPolicy,
};
use crate::services::{ChatService, ImageService, ServiceContext};
use crate::transport::{HttpTransport, HttpTransportImpl};

/// The main ModelScope client.
///
/// All services share one request queue, so the concurrency bound and the
/// spacing between request starts hold across chat and image traffic.
///
/// # Example
///
/// ```rust,no_run
/// use modelscope_client::{Message, ModelScopeClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = ModelScopeClient::builder()
///         .api_key("ms-your-api-key")
///         .build()?;
///
///     let reply = client
///         .chat()
///         .complete(vec![Message::user("Hello!")])
///         .await?;
///     println!("{}", reply);
///     Ok(())
/// }
/// ```
pub struct ModelScopeClient {
    config: Arc<ModelScopeConfig>,
    chat_service: ChatService,
    image_service: ImageService,
    resilience: Arc<ResilienceOrchestrator>,
    metrics: Arc<ClientMetrics>,
}

impl ModelScopeClient {
    /// Creates a new client builder.
    pub fn builder() -> ModelScopeClientBuilder {
        ModelScopeClientBuilder::new()
    }

    /// Creates a client from environment variables.
    ///
    /// See [`ModelScopeConfig::from_env`] for the variables read.
    pub fn from_env() -> ModelScopeResult<Self> {
        let config = ModelScopeConfig::from_env()?;
        ModelScopeClientBuilder::from_config(config).build()
    }

    /// Creates a client from an API key.
    pub fn from_api_key(api_key: impl Into<String>) -> ModelScopeResult<Self> {
        ModelScopeClientBuilder::new().api_key(api_key).build()
    }

    /// Returns the chat service.
    pub fn chat(&self) -> &ChatService {
        &self.chat_service
    }

    /// Returns the image generation service.
    pub fn images(&self) -> &ImageService {
        &self.image_service
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ModelScopeConfig {
        &self.config
    }

    /// Returns a snapshot of the client counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the shared queue and retry policy.
    pub fn resilience(&self) -> &ResilienceOrchestrator {
        &self.resilience
    }

    /// Stops admitting requests. Queued and future requests fail with a
    /// cancellation error; requests already running are unaffected.
    pub fn close(&self) {
        tracing::info!(
            in_flight = self.resilience.queue().in_flight(),
            waiting = self.resilience.queue().waiting(),
            "Closing client"
        );
        self.resilience.queue().close();
    }
}

impl std::fmt::Debug for ModelScopeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelScopeClient")
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for the ModelScope client.
pub struct ModelScopeClientBuilder {
    config_builder: ModelScopeConfigBuilder,
    config: Option<ModelScopeConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    log_config: LogConfig,
    jitter_seed: Option<u64>,
}

impl ModelScopeClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config_builder: ModelScopeConfigBuilder::new(),
            config: None,
            transport: None,
            auth: None,
            log_config: LogConfig::default(),
            jitter_seed: None,
        }
    }

    /// Creates a builder from an existing configuration.
    ///
    /// Configuration setters called afterwards are ignored.
    pub fn from_config(config: ModelScopeConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.api_key(api_key);
        self
    }

    /// Sets the API key from an environment variable.
    pub fn api_key_from_env(mut self, var_name: &str) -> ModelScopeResult<Self> {
        self.config_builder = self.config_builder.api_key_from_env(var_name)?;
        Ok(self)
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(base_url);
        self
    }

    /// Sets the chat model.
    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.chat_model(model);
        self
    }

    /// Sets the image model.
    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.image_model(model);
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config_builder = self.config_builder.temperature(temperature);
        self
    }

    /// Sets the connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the budget for one streaming attempt.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.stream_timeout(timeout);
        self
    }

    /// Sets the maximum retry attempts.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config_builder = self.config_builder.max_retries(retries);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config_builder = self.config_builder.retry(retry);
        self
    }

    /// Sets the request queue policy.
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.config_builder = self.config_builder.queue(queue);
        self
    }

    /// Adds a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.header(name, value);
        self
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom auth provider.
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets how response bodies appear in logs.
    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = config;
        self
    }

    /// Seeds backoff jitter, making retry delays reproducible.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Builds the client.
    pub fn build(self) -> ModelScopeResult<ModelScopeClient> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_builder.build()?,
        };

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                HttpTransportImpl::new(&config.base_url, config.timeout)
                    .map_err(|e| ModelScopeError::configuration(e.to_string()))?,
            ),
        };

        let auth: Arc<dyn AuthProvider> = match self.auth {
            Some(a) => a,
            None => Arc::new(ApiKeyAuth::new(config.api_key.clone())),
        };
        auth.validate()?;

        let metrics = Arc::new(ClientMetrics::new());
        let observer_metrics = Arc::clone(&metrics);
        let observer: AttemptObserver =
            Arc::new(move |attempt: &Attempt| observer_metrics.record_attempt(attempt));

        let retry_policy = match self.jitter_seed {
            Some(seed) => RetryPolicy::with_seed(config.retry.clone(), seed),
            None => RetryPolicy::new(config.retry.clone()),
        }
        .with_observer(observer);
        let resilience = Arc::new(ResilienceOrchestrator::from_parts(
            retry_policy,
            RequestQueue::new(config.queue.clone()),
        ));

        tracing::debug!(
            base_url = %config.base_url,
            chat_model = %config.chat_model,
            image_model = %config.image_model,
            api_key = %config.api_key_hint(),
            "ModelScope client created"
        );

        let config = Arc::new(config);
        let ctx = ServiceContext {
            transport,
            auth,
            resilience: Arc::clone(&resilience),
            metrics: Arc::clone(&metrics),
            config: Arc::clone(&config),
            log_config: self.log_config,
        };

        Ok(ModelScopeClient {
            config,
            chat_service: ChatService::new(ctx.clone()),
            image_service: ImageService::new(ctx),
            resilience,
            metrics,
        })
    }
}

impl Default for ModelScopeClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CancelStage;
    use crate::mocks::{fixtures, MockResponse, MockTransport};
    use crate::types::chat::Message;

    fn client_with(transport: &Arc<MockTransport>) -> ModelScopeClient {
        ModelScopeClient::builder()
            .api_key("ms-test-key-1234")
            .queue(QueueConfig::new().min_interval(Duration::ZERO))
            .transport(Arc::clone(transport) as Arc<dyn HttpTransport>)
            .jitter_seed(7)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_api_key() {
        let result = ModelScopeClientBuilder::new().build();
        assert!(matches!(result, Err(ModelScopeError::Configuration { .. })));
    }

    #[test]
    fn test_builder_rejects_plain_http_for_remote_hosts() {
        let result = ModelScopeClient::builder()
            .api_key("ms-test-key-1234")
            .base_url("http://api-inference.modelscope.cn/v1")
            .build();
        assert!(matches!(result, Err(ModelScopeError::Configuration { .. })));
    }

    #[test]
    fn test_from_config_keeps_settings() {
        let config = ModelScopeConfig::builder()
            .api_key("ms-test-key-1234")
            .chat_model("Qwen/Qwen3-8B")
            .build()
            .unwrap();

        let client = ModelScopeClientBuilder::from_config(config)
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap();

        assert_eq!(client.config().chat_model, "Qwen/Qwen3-8B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_carry_configured_credentials() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_json(&fixtures::chat_response("hi"));
        let client = client_with(&transport);

        client.chat().complete(vec![Message::user("Hi")]).await.unwrap();

        let request = transport.last_request().unwrap();
        assert_eq!(
            request.headers.get("Authorization").unwrap(),
            "Bearer ms-test-key-1234"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_count_attempts_and_fragments() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_error(503, "busy");
        transport.queue(MockResponse::sse(&["Hi", " there"]));
        let client = client_with(&transport);

        let text = client
            .chat()
            .stream(vec![Message::user("Hi")])
            .await
            .unwrap()
            .collect_text()
            .await
            .unwrap();
        assert_eq!(text, "Hi there");

        let metrics = client.metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.attempts, 2);
        assert_eq!(metrics.retries, 1);
        assert_eq!(metrics.fragments, 2);
        assert_eq!(metrics.restarts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_new_requests() {
        let transport = Arc::new(MockTransport::new());
        let client = client_with(&transport);

        client.close();
        let result = client.images().submit("a lighthouse").await;

        assert!(matches!(
            result,
            Err(ModelScopeError::Cancelled {
                stage: CancelStage::Queue
            })
        ));
        assert_eq!(transport.request_count(), 0);
    }
}
