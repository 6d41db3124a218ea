//! HTTP transport layer for the ModelScope client.
//!
//! Provides the HTTP transport abstraction, its reqwest implementation, and
//! the incremental decoder that turns an event-stream body into content
//! fragments.

mod http;
mod streaming;

pub use http::{
    ByteStream, HttpMethod, HttpRequest, HttpResponse, HttpTransport, HttpTransportImpl,
    StreamingResponse,
};
pub use streaming::{FragmentStream, SseLineDecoder, DATA_PREFIX, DONE_SENTINEL};

use std::time::Duration;

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established or was reset.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Timeout error.
    #[error("Timeout after {timeout:?}")]
    Timeout {
        /// Timeout duration.
        timeout: Duration,
    },

    /// Reading the response body failed.
    #[error("Body read error: {message}")]
    Body {
        /// Error message.
        message: String,
    },
}
