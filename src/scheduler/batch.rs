//! Batch / continuation scheduler
//!
//! A task is advanced one batch at a time. Each batch routes its items
//! concurrently, then a single step folds the index-tagged outcomes back into
//! the task and persists it. Item handlers never touch task state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::media::{MediaKind, MediaReference, Platform};
use crate::router::{MediaRouter, Payload, ProbeHints};

use super::store::TaskStore;
use super::types::{
    BatchDetails, BatchInfo, BatchReport, BatchSizes, FailedItem, ProcessOutcome, ProcessedItem,
    ProcessingTask, TaskError, TaskProgress, TaskStatus, BUDGET_EXHAUSTED, DEFAULT_TASK_TTL_SECS,
};

/// Tuning for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub batch_sizes: BatchSizes,
    /// Pause between batches in small-batch mode
    pub batch_delay: Duration,
    pub task_ttl: chrono::Duration,
    /// Outbound operations one invocation may spend
    pub invocation_budget: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            batch_sizes: BatchSizes::default(),
            batch_delay: Duration::from_millis(300),
            task_ttl: chrono::Duration::seconds(DEFAULT_TASK_TTL_SECS),
            invocation_budget: 50,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<BatchSchedulerInner>,
}

struct BatchSchedulerInner {
    router: Arc<dyn MediaRouter>,
    store: Arc<dyn TaskStore>,
    options: SchedulerOptions,
    /// One batch at a time per task
    task_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BatchScheduler {
    pub fn new(
        router: Arc<dyn MediaRouter>,
        store: Arc<dyn TaskStore>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(BatchSchedulerInner {
                router,
                store,
                options,
                task_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    /// Persist a new task for `items`
    pub async fn create_task(
        &self,
        items: Vec<MediaReference>,
        platform: Option<Platform>,
        external_linkage: Option<String>,
    ) -> Result<String, TaskError> {
        if items.is_empty() {
            return Err(TaskError::EmptyBacklog);
        }

        let task = ProcessingTask::new(
            items,
            self.inner.options.batch_sizes,
            self.inner.options.task_ttl,
            platform,
            external_linkage,
        );
        self.inner.store.put(&task).await?;

        tracing::info!(
            task_id = %task.task_id,
            images = task.pending_images.len(),
            videos = task.pending_videos.len(),
            total_batches = task.total_batches,
            "Created processing task"
        );

        Ok(task.task_id)
    }

    /// Run one batch of a task
    ///
    /// Concurrent calls for the same task queue up; each runs the next batch.
    pub async fn advance(&self, task_id: &str) -> Result<BatchReport, TaskError> {
        let lock = self.task_lock(task_id).await;
        let result = {
            let _running = lock.lock().await;
            self.run_batch(task_id).await
        };

        let finished = match &result {
            Ok(report) => report.is_complete,
            Err(e) => matches!(e, TaskError::TaskNotFound(_)),
        };
        if finished {
            let mut locks = self.inner.task_locks.lock().await;
            if locks.get(task_id).is_some_and(|held| Arc::ptr_eq(held, &lock)) {
                locks.remove(task_id);
            }
        }

        result
    }

    async fn task_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .task_locks
            .lock()
            .await
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    async fn run_batch(&self, task_id: &str) -> Result<BatchReport, TaskError> {
        let mut task = self
            .inner
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;

        let batch_number = task.completed_batches + 1;
        let (videos, images) = select_batch(&mut task);
        let capacity = (task.batch_size_videos + task.batch_size_images).max(1);

        let batch_info = BatchInfo {
            batch_number,
            total_batches: task.total_batches,
            images_in_batch: images.len(),
            videos_in_batch: videos.len(),
        };

        tracing::info!(
            task_id = %task_id,
            batch = batch_number,
            total_batches = task.total_batches,
            videos = videos.len(),
            images = images.len(),
            "Advancing task"
        );

        let hints = ProbeHints {
            platform: task.platform,
            backup_urls: Vec::new(),
        };
        let router = &self.inner.router;
        let mut outcomes: Vec<_> = stream::iter(videos.into_iter().chain(images).enumerate())
            .map(|(index, item)| {
                let payload = Payload::Probe(hints.clone());
                async move {
                    let result = router.route(&item, payload).await;
                    (index, item, result)
                }
            })
            .buffer_unordered(capacity)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut details = BatchDetails::default();
        for (_, item, result) in outcomes {
            match result {
                Ok(address) => {
                    let processed = ProcessedItem { item, address };
                    match processed.item.kind() {
                        MediaKind::Video => task.processed_videos.push(processed.clone()),
                        MediaKind::Image => task.processed_images.push(processed.clone()),
                    }
                    details.successes.push(processed);
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        url = %item.url,
                        code = e.code(),
                        error = %e,
                        "Item failed"
                    );
                    let failed = FailedItem {
                        url: item.url,
                        role: item.role,
                        message: e.to_string(),
                        batch: batch_number,
                    };
                    task.failed_items.push(failed.clone());
                    details.errors.push(failed);
                }
            }
        }

        task.completed_batches = batch_number;
        let is_complete = task.is_drained() || task.completed_batches >= task.total_batches;

        if is_complete {
            abandon_leftovers(&mut task, batch_number);
            task.status = if task.processed_count() == 0 && !task.failed_items.is_empty() {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            self.inner.store.delete(task_id).await?;

            tracing::info!(
                task_id = %task_id,
                status = task.status.as_str(),
                processed = task.processed_count(),
                failed = task.failed_items.len(),
                "Task complete"
            );
        } else {
            self.inner.store.put(&task).await?;
        }

        Ok(BatchReport {
            task_id: task_id.to_string(),
            processed_this_batch: details.successes.len(),
            is_complete,
            batch_info,
            details,
            processed: task.processed_count(),
            remaining: task.remaining_count(),
            task: is_complete.then_some(task),
        })
    }

    pub async fn progress(&self, task_id: &str) -> Result<TaskProgress, TaskError> {
        self.inner
            .store
            .get(task_id)
            .await?
            .map(|task| task.progress())
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))
    }

    /// Create a task and drive it as far as this invocation's budget allows
    ///
    /// Small backlogs run to completion with a pause between batches. Larger
    /// ones run a single batch and hand back the task ID for continuation.
    pub async fn process(
        &self,
        items: Vec<MediaReference>,
        platform: Option<Platform>,
        external_linkage: Option<String>,
    ) -> Result<ProcessOutcome, TaskError> {
        let small_batch = items.len().saturating_mul(2) <= self.inner.options.invocation_budget;
        let task_id = self.create_task(items, platform, external_linkage).await?;

        loop {
            let report = self.advance(&task_id).await?;
            if report.is_complete {
                if let Some(task) = report.task {
                    return Ok(ProcessOutcome::Completed { task });
                }
            }
            if !small_batch {
                return Ok(ProcessOutcome::Continuation { task_id, report });
            }
            tokio::time::sleep(self.inner.options.batch_delay).await;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Videos first up to their batch size, then images fill the rest
fn select_batch(task: &mut ProcessingTask) -> (Vec<MediaReference>, Vec<MediaReference>) {
    let capacity = task.batch_size_videos + task.batch_size_images;

    let video_count = task.batch_size_videos.min(task.pending_videos.len());
    let videos: Vec<_> = task.pending_videos.drain(..video_count).collect();

    let image_count = (capacity - videos.len()).min(task.pending_images.len());
    let images: Vec<_> = task.pending_images.drain(..image_count).collect();

    (videos, images)
}

/// Move anything still pending into `failed_items`
fn abandon_leftovers(task: &mut ProcessingTask, batch: u32) {
    let leftovers: Vec<_> = task
        .pending_videos
        .drain(..)
        .chain(task.pending_images.drain(..))
        .collect();

    if !leftovers.is_empty() {
        tracing::warn!(
            task_id = %task.task_id,
            count = leftovers.len(),
            "Batch budget exhausted with items pending"
        );
    }

    task.failed_items
        .extend(leftovers.into_iter().map(|item| FailedItem {
            url: item.url,
            role: item.role,
            message: BUDGET_EXHAUSTED.to_string(),
            batch,
        }));
}

// ============================================================================
// Tests
// ============================================================================
