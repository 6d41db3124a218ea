//! Incremental decoding of chat completion event streams.
//!
//! The wire format is a sequence of `data: <json>` lines terminated by a
//! `data: [DONE]` line. Bytes are buffered until a newline arrives, so a
//! chunk may end anywhere, including inside a multi-byte character.

use bytes::Bytes;
use futures::{ready, Stream};
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::TransportError;
use crate::errors::{ModelScopeError, ModelScopeResult};
use crate::types::chat::ChatChunk;

/// Prefix of lines carrying an event payload.
pub const DATA_PREFIX: &str = "data:";

/// Payload marking normal end of stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What a single complete line amounted to.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Fragment(String),
    Done,
    Malformed,
    Empty,
}

/// Push-style decoder: feed byte chunks, receive content fragments.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    done: bool,
    skipped: usize,
}

impl SseLineDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the fragments completed by it, in order.
    ///
    /// Once the sentinel has been seen, further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut fragments = Vec::new();
        if self.done {
            return fragments;
        }

        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let line = decode_line(&self.buffer[consumed..end]);
            consumed = end + 1;

            match line {
                Line::Fragment(text) => fragments.push(text),
                Line::Done => {
                    self.done = true;
                    break;
                }
                Line::Malformed => self.skipped += 1,
                Line::Empty => {}
            }
        }

        if self.done {
            self.buffer.clear();
        } else {
            self.buffer.drain(..consumed);
        }

        fragments
    }

    /// Signals that the byte source is exhausted.
    ///
    /// An incomplete trailing line is discarded; returns how many bytes were
    /// dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "Discarding incomplete trailing line");
        }
        self.buffer.clear();
        dropped
    }

    /// Returns true once the sentinel terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns how many malformed lines were skipped so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }
}

fn decode_line(raw: &[u8]) -> Line {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping stream line with invalid UTF-8");
            return Line::Malformed;
        }
    };

    let payload = match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => return Line::Empty,
    };

    if payload.trim() == DONE_SENTINEL {
        return Line::Done;
    }

    if payload.trim().is_empty() {
        return Line::Empty;
    }

    match serde_json::from_str::<ChatChunk>(payload) {
        Ok(chunk) => match chunk.content() {
            Some(content) if !content.is_empty() => Line::Fragment(content.to_string()),
            _ => Line::Empty,
        },
        Err(e) => {
            tracing::debug!(error = %e, data = %payload, "Skipping malformed stream event");
            Line::Malformed
        }
    }
}

pin_project! {
    /// Pull-style fragment stream over a body of byte chunks.
    ///
    /// Ends at the sentinel or when the source is exhausted. A source error
    /// is yielded once as a retryable [`ModelScopeError::Stream`], after
    /// which the stream ends.
    pub struct FragmentStream<S> {
        #[pin]
        inner: S,
        decoder: SseLineDecoder,
        pending: VecDeque<String>,
        finished: bool,
    }
}

impl<S> FragmentStream<S>
where
    S: Stream<Item = Result<Bytes, TransportError>>,
{
    /// Wraps a byte stream.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: SseLineDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Returns how many malformed lines were skipped so far.
    pub fn skipped_lines(&self) -> usize {
        self.decoder.skipped_lines()
    }
}

impl<S> Stream for FragmentStream<S>
where
    S: Stream<Item = Result<Bytes, TransportError>>,
{
    type Item = ModelScopeResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(fragment) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(fragment)));
            }

            if *this.finished || this.decoder.is_done() {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => this.pending.extend(this.decoder.feed(&bytes)),
                Some(Err(e)) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(ModelScopeError::Stream {
                        message: format!("Connection lost mid-stream: {}", e),
                    })));
                }
                None => {
                    this.decoder.finish();
                    *this.finished = true;
                }
            }
        }
    }
}
