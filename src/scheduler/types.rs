//! Task and report types for batched processing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::{MediaKind, MediaReference, MediaRole, Platform};
use crate::router::Address;

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_BATCH_SIZE_IMAGES: usize = 20;
pub const DEFAULT_BATCH_SIZE_VIDEOS: usize = 8;

/// Task lifetime in the store: 1 hour
pub const DEFAULT_TASK_TTL_SECS: i64 = 3600;

/// Leftovers when the batch count runs out
pub const BUDGET_EXHAUSTED: &str = "batch budget exhausted";

// ============================================================================
// Task
// ============================================================================

/// Per-kind batch capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSizes {
    pub images: usize,
    pub videos: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            images: DEFAULT_BATCH_SIZE_IMAGES,
            videos: DEFAULT_BATCH_SIZE_VIDEOS,
        }
    }
}

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A routed item and where it ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub item: MediaReference,
    pub address: Address,
}

/// An item that will not be retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub url: String,
    pub role: MediaRole,
    pub message: String,
    /// 1-based batch in which the item failed
    pub batch: u32,
}

/// Persistent state of a batched backlog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTask {
    pub task_id: String,
    pub pending_images: Vec<MediaReference>,
    pub pending_videos: Vec<MediaReference>,
    pub processed_images: Vec<ProcessedItem>,
    pub processed_videos: Vec<ProcessedItem>,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
    pub batch_size_images: usize,
    pub batch_size_videos: usize,
    pub completed_batches: u32,
    pub total_batches: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_linkage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ProcessingTask {
    pub fn new(
        items: Vec<MediaReference>,
        sizes: BatchSizes,
        ttl: chrono::Duration,
        platform: Option<Platform>,
        external_linkage: Option<String>,
    ) -> Self {
        let (pending_videos, pending_images): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| item.kind() == MediaKind::Video);

        let sizes = BatchSizes {
            images: sizes.images.max(1),
            videos: sizes.videos.max(1),
        };
        let total_batches = pending_videos
            .len()
            .div_ceil(sizes.videos)
            .max(pending_images.len().div_ceil(sizes.images)) as u32;

        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            pending_images,
            pending_videos,
            processed_images: Vec::new(),
            processed_videos: Vec::new(),
            failed_items: Vec::new(),
            batch_size_images: sizes.images,
            batch_size_videos: sizes.videos,
            completed_batches: 0,
            total_batches,
            status: TaskStatus::Processing,
            created_at: now,
            expires_at: now + ttl,
            external_linkage,
            platform,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn processed_count(&self) -> usize {
        self.processed_images.len() + self.processed_videos.len()
    }

    pub fn remaining_count(&self) -> usize {
        self.pending_images.len() + self.pending_videos.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending_images.is_empty() && self.pending_videos.is_empty()
    }

    /// Processed addresses, images first
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.processed_images
            .iter()
            .chain(&self.processed_videos)
            .map(|p| &p.address)
    }

    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            task_id: self.task_id.clone(),
            completed_batches: self.completed_batches,
            total_batches: self.total_batches,
            processed: self.processed_count(),
            remaining: self.remaining_count(),
            failed: self.failed_items.len(),
            status: self.status,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    /// 1-based number of the batch just run
    pub batch_number: u32,
    pub total_batches: u32,
    pub images_in_batch: usize,
    pub videos_in_batch: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDetails {
    pub successes: Vec<ProcessedItem>,
    pub errors: Vec<FailedItem>,
}

/// Result of one `advance` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub task_id: String,
    pub processed_this_batch: usize,
    pub is_complete: bool,
    pub batch_info: BatchInfo,
    pub details: BatchDetails,
    /// Processed so far across all batches
    pub processed: usize,
    pub remaining: usize,
    /// Final task state, present once complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<ProcessingTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: String,
    pub completed_batches: u32,
    pub total_batches: u32,
    pub processed: usize,
    pub remaining: usize,
    pub failed: usize,
    pub status: TaskStatus,
}

/// What `process` hands back to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ProcessOutcome {
    /// Small backlog finished inline
    Completed { task: ProcessingTask },
    /// Large backlog: first batch done, continue with `advance`
    #[serde(rename_all = "camelCase")]
    Continuation { task_id: String, report: BatchReport },
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task has no media items")]
    EmptyBacklog,

    #[error("Task store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for TaskError {
    fn from(e: sqlx::Error) -> Self {
        TaskError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Store(format!("corrupt task payload: {}", e))
    }
}

impl TaskError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::TaskNotFound(_) => StatusCode::NOT_FOUND,
            Self::EmptyBacklog => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::EmptyBacklog => "EMPTY_BACKLOG",
            Self::Store(_) => "TASK_STORE_ERROR",
        }
    }
}
