//! Batch / continuation scheduler
//!
//! Splits a media backlog into batches small enough for one invocation's
//! outbound budget and keeps resumable task state between invocations.

pub mod batch;
pub mod store;
pub mod types;

pub use batch::{BatchScheduler, SchedulerOptions};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use types::*;
