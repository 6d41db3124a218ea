//! ModelScope Client Library
//!
//! A resilient Rust client for the ModelScope inference API. Provides
//! streaming and non-streaming chat completions and asynchronous image
//! generation, behind a shared request queue and retry policy.
//!
//! # Features
//!
//! - **Streaming Chat**: Incremental event-stream decoding with automatic
//!   restart when a stream breaks mid-way
//! - **Image Generation**: Submit/poll workflow with cached terminal results
//! - **Resilience**: Exponential backoff with jitter, bounded concurrency,
//!   spacing between request starts, cancellation at every suspension point
//! - **Observability**: `tracing` spans and events, redacted logs, counters
//! - **Async/Await**: Built on Tokio
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modelscope_client::{Message, ModelScopeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ModelScopeClient::builder()
//!         .api_key("ms-your-api-key")
//!         .build()?;
//!
//!     let reply = client
//!         .chat()
//!         .complete(vec![Message::user("Hello, ModelScope!")])
//!         .await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use modelscope_client::{ChatEvent, Message, ModelScopeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ModelScopeClient::from_env()?;
//!
//!     let mut stream = client
//!         .chat()
//!         .stream(vec![Message::user("Tell me a story")])
//!         .await?;
//!
//!     while let Some(event) = stream.next().await {
//!         match event? {
//!             ChatEvent::Fragment(text) => print!("{}", text),
//!             ChatEvent::Restart { .. } => println!("\n[connection lost, starting over]"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Image Generation Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use modelscope_client::{ModelScopeClient, TaskStatus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ModelScopeClient::from_env()?;
//!     let task_id = client.images().submit("a lighthouse at dusk").await?;
//!
//!     loop {
//!         let task = client.images().poll(&task_id).await?;
//!         match task.status {
//!             TaskStatus::Completed => {
//!                 println!("{}", task.result_url.unwrap_or_default());
//!                 break;
//!             }
//!             TaskStatus::Failed => {
//!                 eprintln!("generation failed");
//!                 break;
//!             }
//!             TaskStatus::Pending => tokio::time::sleep(Duration::from_secs(5)).await,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod services;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{ModelScopeClient, ModelScopeClientBuilder};
pub use config::ModelScopeConfig;
pub use errors::{CancelStage, ModelScopeError, ModelScopeResult};
pub use observability::{init_tracing, LogConfig, LogLevel, MetricsSnapshot};
pub use resilience::{QueueConfig, RetryConfig};
pub use services::{ChatEvent, ChatService, ChatStream, ImageService};

// Type re-exports
pub use types::chat::{ChatChunk, ChatRequest, ChatResponse, Message, Role, Usage};
pub use types::images::{AsyncTask, TaskStatus};

// Cancellation handle accepted by the `*_cancellable` operations.
pub use tokio_util::sync::CancellationToken;

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
