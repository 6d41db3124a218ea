//! Type definitions for the ModelScope inference API.
//!
//! Request and response bodies for chat completions (streaming and not) and
//! for asynchronous image generation tasks.

pub mod chat;
pub mod images;
