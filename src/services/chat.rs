//! Chat completions service.
//!
//! Streaming requests are driven by a producer task that runs the whole
//! queue and retry cycle and forwards decoded fragments through a bounded
//! channel. The consumer side is a [`ChatStream`]; dropping it cancels the
//! producer wherever it is suspended.
//!
//! Each attempt gets `stream_timeout` of network time. Time the producer
//! spends blocked on a full channel is not charged, so a slow reader never
//! turns a healthy stream into a timeout.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{instrument, Instrument};
use uuid::Uuid;

use super::ServiceContext;
use crate::errors::{CancelStage, ModelScopeError, ModelScopeResult};
use crate::observability::RequestTimer;
use crate::transport::{FragmentStream, HttpRequest};
use crate::types::chat::{ChatRequest, ChatResponse, Message};

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Events buffered between the producer and a slow consumer.
const EVENT_BUFFER: usize = 64;

/// One item of a chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A piece of generated text.
    Fragment(String),
    /// The previous attempt broke after producing output and a new attempt
    /// is starting from the top. Everything received before this event
    /// belongs to the abandoned attempt.
    Restart {
        /// 1-based number of the attempt whose fragments follow.
        attempt: u32,
    },
}

/// Chat completions service.
pub struct ChatService {
    ctx: ServiceContext,
}

impl ChatService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Starts a streaming completion for `messages`.
    ///
    /// Fails immediately only on local validation; every network outcome is
    /// delivered through the returned stream.
    pub async fn stream(&self, messages: Vec<Message>) -> ModelScopeResult<ChatStream> {
        self.stream_cancellable(messages, CancellationToken::new())
            .await
    }

    /// Like [`stream`](Self::stream), also stopping when `token` is
    /// cancelled.
    #[instrument(skip(self, messages, token), fields(model = %self.ctx.config.chat_model, messages = messages.len()))]
    pub async fn stream_cancellable(
        &self,
        messages: Vec<Message>,
        token: CancellationToken,
    ) -> ModelScopeResult<ChatStream> {
        let request = self.build_request(messages, true)?;

        let stream_id = Uuid::new_v4();
        let token = token.child_token();
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);

        let producer = StreamProducer {
            ctx: self.ctx.clone(),
            request,
            sender,
            token: token.clone(),
        };
        let span = tracing::info_span!(
            "chat_stream",
            %stream_id,
            model = %self.ctx.config.chat_model
        );
        tokio::spawn(producer.run().instrument(span));

        tracing::debug!(%stream_id, "Chat stream started");

        Ok(ChatStream {
            receiver,
            stream_id,
            token: token.clone(),
            _cancel_on_drop: token.drop_guard(),
        })
    }

    /// Runs a non-streaming completion and returns the first choice's
    /// content, or an empty string if the service returned none.
    #[instrument(skip(self, messages), fields(model = %self.ctx.config.chat_model))]
    pub async fn complete(&self, messages: Vec<Message>) -> ModelScopeResult<String> {
        let request = self.build_request(messages, false)?;
        let timer = RequestTimer::new("chat.complete");

        let result = self
            .ctx
            .resilience
            .execute(|| self.ctx.send_checked(request.clone()))
            .await;
        timer.finish(&self.ctx.metrics, result.is_ok());

        let response: ChatResponse = result?.json()?;
        Ok(response.content().unwrap_or_default().to_string())
    }

    /// Builds an HTTP request from a message list.
    fn build_request(&self, messages: Vec<Message>, streaming: bool) -> ModelScopeResult<HttpRequest> {
        let config = &self.ctx.config;
        let request = ChatRequest::new(
            config.chat_model.clone(),
            messages,
            streaming,
            config.temperature,
        );
        request.validate()?;

        let body = serde_json::to_vec(&request)?;

        let mut http_request = HttpRequest::post(CHAT_COMPLETIONS_PATH)
            .with_body(body)
            .with_header("Content-Type", mime::APPLICATION_JSON.as_ref());
        if streaming {
            http_request = http_request.with_header("Accept", mime::TEXT_EVENT_STREAM.as_ref());
        }
        http_request.headers.extend(self.ctx.base_headers());

        Ok(http_request)
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("model", &self.ctx.config.chat_model)
            .finish()
    }
}

/// Consumer side of a streaming completion.
///
/// Yields [`ChatEvent`]s in order, then at most one error, then ends.
/// Dropping the stream cancels the request.
pub struct ChatStream {
    receiver: mpsc::Receiver<ModelScopeResult<ChatEvent>>,
    stream_id: Uuid,
    token: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl ChatStream {
    /// Identifier attached to this stream's log events.
    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    /// Cancels the request. The stream then yields a cancellation error
    /// and ends.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Drains the stream into the text of the attempt that finished.
    ///
    /// Output received before a [`ChatEvent::Restart`] is discarded.
    pub async fn collect_text(mut self) -> ModelScopeResult<String> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event? {
                ChatEvent::Fragment(fragment) => text.push_str(&fragment),
                ChatEvent::Restart { .. } => text.clear(),
            }
        }
        Ok(text)
    }
}

impl Stream for ChatStream {
    type Item = ModelScopeResult<ChatEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("stream_id", &self.stream_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

struct StreamProducer {
    ctx: ServiceContext,
    request: HttpRequest,
    sender: mpsc::Sender<ModelScopeResult<ChatEvent>>,
    token: CancellationToken,
}

impl StreamProducer {
    async fn run(self) {
        let timer = RequestTimer::new("chat.stream");
        let attempts = AtomicU32::new(0);
        let emitted = AtomicBool::new(false);

        let result = self
            .ctx
            .resilience
            .execute_cancellable(&self.token, None, || {
                let index = attempts.fetch_add(1, Ordering::SeqCst);
                self.attempt(index, &emitted)
            })
            .await;

        let elapsed = timer.finish(&self.ctx.metrics, result.is_ok());

        match result {
            Ok(()) => tracing::debug!(
                attempts = attempts.load(Ordering::SeqCst),
                elapsed_ms = elapsed.as_millis() as u64,
                "Chat stream finished"
            ),
            Err(err) => {
                if err.is_cancelled() {
                    tracing::debug!(error = %err, "Chat stream cancelled");
                } else {
                    tracing::warn!(error = %err, "Chat stream failed");
                }
                // The consumer may already be gone.
                let _ = self.sender.send(Err(err)).await;
            }
        }
    }

    async fn attempt(&self, index: u32, emitted: &AtomicBool) -> ModelScopeResult<()> {
        if index > 0 && emitted.swap(false, Ordering::SeqCst) {
            tracing::info!(attempt = index + 1, "Restarting stream from the top");
            self.ctx.metrics.record_restart();
            self.emit(ChatEvent::Restart { attempt: index + 1 }).await?;
        }

        let mut budget = NetworkBudget::new(self.ctx.config.stream_timeout);

        let response = budget
            .spend(self.ctx.transport.send_streaming(self.request.clone()))
            .await??;

        if !response.is_success() {
            let status = response.status;
            let headers = response.headers.clone();
            let body = budget.spend(response.read_body_lossy()).await?;
            return Err(self
                .ctx
                .rejection(&self.request.path, status, &headers, &body));
        }

        let mut fragments = FragmentStream::new(response.stream);
        while let Some(fragment) = budget.spend(fragments.next()).await? {
            let fragment = fragment?;
            emitted.store(true, Ordering::SeqCst);
            self.ctx.metrics.record_fragment();
            self.emit(ChatEvent::Fragment(fragment)).await?;
        }

        if fragments.skipped_lines() > 0 {
            tracing::debug!(
                skipped = fragments.skipped_lines(),
                "Skipped malformed stream lines"
            );
        }

        Ok(())
    }

    async fn emit(&self, event: ChatEvent) -> ModelScopeResult<()> {
        self.sender
            .send(Ok(event))
            .await
            .map_err(|_| ModelScopeError::Cancelled {
                stage: CancelStage::Stream,
            })
    }
}

/// Network time left to one streaming attempt.
struct NetworkBudget {
    limit: Duration,
    remaining: Duration,
}

impl NetworkBudget {
    fn new(limit: Duration) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    /// Awaits `io`, charging the wait against the budget.
    async fn spend<F: Future>(&mut self, io: F) -> ModelScopeResult<F::Output> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.remaining, io).await;
        self.remaining = self.remaining.saturating_sub(started.elapsed());
        result.map_err(|_| ModelScopeError::Timeout {
            message: format!("stream attempt exceeded {:?} of network time", self.limit),
        })
    }
}
