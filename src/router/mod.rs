//! Storage routing
//!
//! Decides per media item whether the bytes are uploaded to the hosting
//! backend or deferred behind a proxy address, and executes direct uploads.

mod required;
mod storage_router;
mod types;

pub use required::route_required;
pub use storage_router::StorageRouter;
pub use types::*;
