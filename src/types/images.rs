//! Asynchronous image generation types.

use serde::{Deserialize, Serialize};

/// Image generation request body.
#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest {
    /// Model ID.
    pub model: String,
    /// Text prompt.
    pub prompt: String,
}

/// Response to an asynchronous image submission.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmission {
    /// Opaque task identifier.
    pub task_id: String,
}

/// Raw task status as reported by the task endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    /// One of `PENDING`, `RUNNING`, `PROCESSING`, `SUCCEED`, `FAILED`.
    #[serde(default)]
    pub task_status: String,
    /// Result image URLs, present on success.
    #[serde(default)]
    pub output_images: Option<Vec<String>>,
}

/// Client-side view of a task's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still queued or running.
    Pending,
    /// Finished with a result URL.
    Completed,
    /// Finished without a result.
    Failed,
}

impl TaskStatus {
    /// Returns true once no further polling is meaningful.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// An asynchronous image generation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncTask {
    /// Opaque task identifier.
    pub task_id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Result URL; always present and non-empty when completed.
    pub result_url: Option<String>,
    /// Raw service response for failed tasks, for diagnostics only.
    pub failure_reason: Option<String>,
}

impl AsyncTask {
    /// Creates a pending task.
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            result_url: None,
            failure_reason: None,
        }
    }

    /// Returns true once the task is completed or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
