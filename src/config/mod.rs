//! Configuration module for the ModelScope client.
//!
//! Provides configuration management including API keys, base URLs,
//! default models, timeouts, and the retry and queue policies.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::{Host, Url};

use crate::errors::{ModelScopeError, ModelScopeResult};
use crate::resilience::{QueueConfig, ResilienceConfig, RetryConfig};

/// Default base URL for the ModelScope inference API.
pub const DEFAULT_BASE_URL: &str = "https://api-inference.modelscope.cn/v1";

/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "ZhipuAI/GLM-4.7-Flash";

/// Default image generation model.
pub const DEFAULT_IMAGE_MODEL: &str = "Qwen/Qwen-Image-2512";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default connect timeout for the HTTP client (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default end-to-end budget for one streaming attempt (60 seconds).
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the ModelScope client.
#[derive(Clone)]
pub struct ModelScopeConfig {
    /// API key for authentication (stored securely).
    pub(crate) api_key: SecretString,
    /// Base URL for API requests, without trailing slash.
    pub base_url: String,
    /// Model used for chat completions.
    pub chat_model: String,
    /// Model used for image generation.
    pub image_model: String,
    /// Sampling temperature sent with chat requests.
    pub temperature: f32,
    /// Connect timeout of the HTTP client.
    pub timeout: Duration,
    /// Network time allowed to one streaming attempt, from request to last
    /// byte. Time spent waiting for the reader to drain events is excluded.
    pub stream_timeout: Duration,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Request queue policy.
    pub queue: QueueConfig,
    /// Custom headers to include in requests.
    pub custom_headers: Vec<(String, String)>,
}

impl ModelScopeConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ModelScopeConfigBuilder {
        ModelScopeConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MODELSCOPE_API_KEY` (required): API key for authentication
    /// - `MODELSCOPE_BASE_URL` (optional): Custom base URL
    /// - `MODELSCOPE_CHAT_MODEL` (optional): Chat model ID
    /// - `MODELSCOPE_IMAGE_MODEL` (optional): Image model ID
    /// - `MODELSCOPE_TIMEOUT` (optional): Connect timeout in seconds
    /// - `MODELSCOPE_MAX_RETRIES` (optional): Maximum retry attempts
    pub fn from_env() -> ModelScopeResult<Self> {
        let api_key = std::env::var("MODELSCOPE_API_KEY").map_err(|_| {
            ModelScopeError::configuration("MODELSCOPE_API_KEY environment variable not set")
        })?;

        let mut builder = ModelScopeConfigBuilder::new().api_key(api_key);

        if let Ok(base_url) = std::env::var("MODELSCOPE_BASE_URL") {
            builder = builder.base_url(base_url);
        }

        if let Ok(model) = std::env::var("MODELSCOPE_CHAT_MODEL") {
            builder = builder.chat_model(model);
        }

        if let Ok(model) = std::env::var("MODELSCOPE_IMAGE_MODEL") {
            builder = builder.image_model(model);
        }

        if let Ok(timeout_str) = std::env::var("MODELSCOPE_TIMEOUT") {
            if let Ok(timeout_secs) = timeout_str.parse::<u64>() {
                builder = builder.timeout(Duration::from_secs(timeout_secs));
            }
        }

        if let Ok(retries_str) = std::env::var("MODELSCOPE_MAX_RETRIES") {
            if let Ok(retries) = retries_str.parse::<u32>() {
                builder = builder.max_retries(retries);
            }
        }

        builder.build()
    }

    /// Returns the API key (exposing the secret).
    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Returns the API key hint (last 4 characters) for debugging.
    pub fn api_key_hint(&self) -> String {
        key_hint(self.api_key.expose_secret())
    }

    /// Returns the resilience settings.
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            retry: self.retry.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl std::fmt::Debug for ModelScopeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelScopeConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("image_model", &self.image_model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("retry", &self.retry)
            .field("queue", &self.queue)
            .finish()
    }
}

pub(crate) fn key_hint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("...{}", tail)
    } else {
        "****".to_string()
    }
}

/// Builder for `ModelScopeConfig`.
#[derive(Default)]
pub struct ModelScopeConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    chat_model: Option<String>,
    image_model: Option<String>,
    temperature: Option<f32>,
    timeout: Option<Duration>,
    stream_timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry: Option<RetryConfig>,
    queue: Option<QueueConfig>,
    custom_headers: Vec<(String, String)>,
}

impl ModelScopeConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the API key from an environment variable.
    pub fn api_key_from_env(mut self, var_name: &str) -> ModelScopeResult<Self> {
        let api_key = std::env::var(var_name).map_err(|_| {
            ModelScopeError::configuration(format!("Environment variable {} not set", var_name))
        })?;
        self.api_key = Some(api_key);
        Ok(self)
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the chat model.
    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    /// Sets the image model.
    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = Some(model.into());
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Sets the budget for one streaming attempt.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    /// Sets the maximum retry attempts, overriding the retry policy's value.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the request queue policy.
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ModelScopeResult<ModelScopeConfig> {
        let api_key = self
            .api_key
            .ok_or_else(|| ModelScopeError::configuration("API key is required"))?;

        if api_key.trim().is_empty() {
            return Err(ModelScopeError::configuration("API key cannot be empty"));
        }

        if !api_key.starts_with("ms-") {
            tracing::warn!(
                key_hint = %key_hint(&api_key),
                "API key does not match expected ModelScope format (ms-*)"
            );
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        validate_base_url(&base_url)?;

        let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ModelScopeError::configuration(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }

        let chat_model = self.chat_model.unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let image_model = self.image_model.unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        if chat_model.is_empty() || image_model.is_empty() {
            return Err(ModelScopeError::configuration("Model IDs cannot be empty"));
        }

        let mut retry = self.retry.unwrap_or_default();
        if let Some(max_retries) = self.max_retries {
            retry.max_retries = max_retries;
        }
        retry.validate()?;

        let queue = self.queue.unwrap_or_default();
        queue.validate()?;

        let stream_timeout = self.stream_timeout.unwrap_or(DEFAULT_STREAM_TIMEOUT);
        if stream_timeout.is_zero() {
            return Err(ModelScopeError::configuration(
                "Stream timeout must be positive",
            ));
        }

        Ok(ModelScopeConfig {
            api_key: SecretString::new(api_key),
            base_url,
            chat_model,
            image_model,
            temperature,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            stream_timeout,
            retry,
            queue,
            custom_headers: self.custom_headers,
        })
    }
}

/// Requires HTTPS, except for loopback hosts used by local test servers.
fn validate_base_url(base_url: &str) -> ModelScopeResult<()> {
    let url = Url::parse(base_url)?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        _ => Err(ModelScopeError::configuration("Base URL must use HTTPS")),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
