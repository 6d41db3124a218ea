//! Asynchronous image generation service.

use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::instrument;

use super::ServiceContext;
use crate::errors::{ModelScopeError, ModelScopeResult};
use crate::observability::RequestTimer;
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::images::{
    AsyncTask, ImageGenerationRequest, TaskStatus, TaskStatusResponse, TaskSubmission,
};

const GENERATIONS_PATH: &str = "images/generations";
const TASKS_PATH: &str = "tasks";

const ASYNC_MODE_HEADER: &str = "X-ModelScope-Async-Mode";
const TASK_TYPE_HEADER: &str = "X-ModelScope-Task-Type";
const IMAGE_TASK_TYPE: &str = "image_generation";

const STATUS_SUCCEEDED: &str = "SUCCEED";
const STATUS_FAILED: &str = "FAILED";

/// Finished tasks remembered per client before the least recently polled
/// one is dropped.
const FINISHED_TASK_CAPACITY: usize = 256;

/// Image generation service.
///
/// Generation runs server-side; [`submit`](Self::submit) returns a task id
/// and [`poll`](Self::poll) reports progress. Polling is driven by the
/// caller. Recently finished tasks are remembered, so polling them again
/// costs no request. Use [`forget`](Self::forget) to drop one early.
pub struct ImageService {
    ctx: ServiceContext,
    finished: Mutex<LruCache<String, AsyncTask>>,
}

impl ImageService {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self::with_cache_capacity(ctx, FINISHED_TASK_CAPACITY)
    }

    pub(crate) fn with_cache_capacity(ctx: ServiceContext, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ctx,
            finished: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Submits a generation job and returns its task id.
    #[instrument(skip(self, prompt), fields(model = %self.ctx.config.image_model))]
    pub async fn submit(&self, prompt: &str) -> ModelScopeResult<String> {
        if prompt.trim().is_empty() {
            return Err(ModelScopeError::validation_param(
                "Prompt cannot be empty",
                "prompt",
            ));
        }

        let body = serde_json::to_vec(&ImageGenerationRequest {
            model: self.ctx.config.image_model.clone(),
            prompt: prompt.to_string(),
        })?;
        let mut request = HttpRequest::post(GENERATIONS_PATH)
            .with_body(body)
            .with_header("Content-Type", mime::APPLICATION_JSON.as_ref())
            .with_header(ASYNC_MODE_HEADER, "true");
        request.headers.extend(self.ctx.base_headers());

        let response = self.send(request, "images.submit").await?;
        let submission: TaskSubmission = response.json()?;

        if submission.task_id.is_empty() {
            return Err(ModelScopeError::InvalidResponse {
                message: "Task submission returned an empty task_id".to_string(),
            });
        }

        self.ctx.metrics.record_task_submitted();
        tracing::info!(task_id = %submission.task_id, "Image task submitted");

        Ok(submission.task_id)
    }

    /// Reports the current state of a task.
    #[instrument(skip(self))]
    pub async fn poll(&self, task_id: &str) -> ModelScopeResult<AsyncTask> {
        validate_task_id(task_id)?;

        if let Some(task) = self.finished.lock().await.get(task_id) {
            tracing::debug!(status = ?task.status, "Returning finished task from cache");
            self.ctx.metrics.record_task_polled();
            return Ok(task.clone());
        }

        let mut request = HttpRequest::get(format!("{}/{}", TASKS_PATH, task_id))
            .with_header(TASK_TYPE_HEADER, IMAGE_TASK_TYPE);
        request.headers.extend(self.ctx.base_headers());

        let response = self.send(request, "images.poll").await?;
        let task = interpret_status(task_id, &response)?;
        self.ctx.metrics.record_task_polled();

        if task.is_terminal() {
            tracing::info!(status = ?task.status, "Image task finished");
            self.finished
                .lock()
                .await
                .put(task_id.to_string(), task.clone());
        } else {
            tracing::debug!("Image task still pending");
        }

        Ok(task)
    }

    /// Drops a finished task from the cache. Returns whether it was there.
    ///
    /// A later [`poll`](Self::poll) for the same id asks the service again.
    pub async fn forget(&self, task_id: &str) -> bool {
        self.finished.lock().await.pop(task_id).is_some()
    }

    async fn send(&self, request: HttpRequest, operation: &'static str) -> ModelScopeResult<HttpResponse> {
        let timer = RequestTimer::new(operation);
        let result = self
            .ctx
            .resilience
            .execute(|| self.ctx.send_checked(request.clone()))
            .await;
        timer.finish(&self.ctx.metrics, result.is_ok());
        result
    }
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("model", &self.ctx.config.image_model)
            .finish_non_exhaustive()
    }
}

fn validate_task_id(task_id: &str) -> ModelScopeResult<()> {
    if task_id.is_empty() {
        return Err(ModelScopeError::validation_param(
            "Task id cannot be empty",
            "task_id",
        ));
    }
    if task_id.contains('/') || task_id.chars().any(char::is_whitespace) {
        return Err(ModelScopeError::validation_param(
            format!("Task id is not a single path segment: {:?}", task_id),
            "task_id",
        ));
    }
    Ok(())
}

fn interpret_status(task_id: &str, response: &HttpResponse) -> ModelScopeResult<AsyncTask> {
    let status: TaskStatusResponse = response.json()?;

    match status.task_status.as_str() {
        STATUS_SUCCEEDED => {
            let url = status
                .output_images
                .unwrap_or_default()
                .into_iter()
                .find(|url| !url.is_empty())
                .ok_or_else(|| ModelScopeError::InvalidResponse {
                    message: format!("Task {} succeeded without an output image", task_id),
                })?;
            Ok(AsyncTask {
                task_id: task_id.to_string(),
                status: TaskStatus::Completed,
                result_url: Some(url),
                failure_reason: None,
            })
        }
        STATUS_FAILED => Ok(AsyncTask {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            result_url: None,
            failure_reason: Some(String::from_utf8_lossy(&response.body).into_owned()),
        }),
        _ => Ok(AsyncTask::pending(task_id)),
    }
}
