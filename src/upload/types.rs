//! Chunked upload types

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::{Address, RouteError};

// ============================================================================
// Constants
// ============================================================================

/// Largest file a chunk session may accumulate: 100MB
pub const DEFAULT_CHUNK_UPLOAD_CEILING: u64 = 100 * 1024 * 1024;

/// Idle session lifetime: 1 hour
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

/// How far a merge's `totalChunks` may run past the chunks actually received
pub const MAX_MISSING_CHUNKS: usize = 1024;

// ============================================================================
// Chunk Types
// ============================================================================

/// Optional fields a client may send alongside any chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkMeta {
    pub total_chunks: Option<usize>,
    pub original_file_name: Option<String>,
    pub original_file_type: Option<String>,
    pub original_file_size: Option<u64>,
}

/// Result of storing one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub accepted: bool,
    pub received_count: usize,
    pub total_chunks: Option<usize>,
}

/// Response body for `POST /upload-chunk`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub chunk_index: usize,
    pub session_id: String,
    /// All declared chunks are present
    pub is_complete: bool,
    pub uploaded_chunks: usize,
    pub total_chunks: Option<usize>,
}

// ============================================================================
// Merge Types
// ============================================================================

/// Request body for `POST /merge-chunks`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub session_id: String,
    pub file_name: String,
    pub total_chunks: usize,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_type: Option<String>,
}

/// What a successful merge produced
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub address: Address,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// Response body for a successful merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResponse {
    pub success: bool,
    pub result: MergeResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub src: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
    pub is_chunk_file: bool,
}

impl From<MergeOutcome> for MergeResponse {
    fn from(outcome: MergeOutcome) -> Self {
        Self {
            success: true,
            result: MergeResult {
                src: outcome.address.url().to_string(),
                name: outcome.name,
                size: outcome.size,
                content_type: outcome.content_type,
                is_chunk_file: true,
            },
        }
    }
}

/// Merge replies as seen by clients, in decoding priority
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeReply {
    Result { result: MergeReplySrc },
    Url { url: String },
    FileId {
        #[serde(rename = "fileId")]
        file_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MergeReplySrc {
    pub src: String,
}

impl MergeReply {
    /// Address or file identifier carried by the reply
    pub fn location(&self) -> &str {
        match self {
            MergeReply::Result { result } => &result.src,
            MergeReply::Url { url } => url,
            MergeReply::FileId { file_id } => file_id,
        }
    }
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting chunks
    Open,
    /// Chunks assembled, routing in flight
    Merging,
    /// Routed successfully
    Complete,
    /// Routing failed
    Failed,
}

/// One in-progress chunked upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: String,
    pub original_file_name: Option<String>,
    pub original_file_type: Option<String>,
    pub declared_file_size: Option<u64>,
    pub declared_total_chunks: Option<usize>,
    /// Chunk bytes by index; re-uploads replace
    pub chunks: BTreeMap<usize, Bytes>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(id: impl Into<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            original_file_name: None,
            original_file_type: None,
            declared_file_size: None,
            declared_total_chunks: None,
            chunks: BTreeMap::new(),
            status: SessionStatus::Open,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Bytes currently held across all chunks
    pub fn received_bytes(&self) -> u64 {
        self.chunks.values().map(|c| c.len() as u64).sum()
    }

    /// Indices in `[0, total)` not yet received
    pub fn missing_chunks(&self, total: usize) -> Vec<usize> {
        (0..total).filter(|i| !self.chunks.contains_key(i)).collect()
    }

    /// Check a merge's `totalChunks` against what this session has seen
    ///
    /// The count must match a declared total, cover every received index, and
    /// stay within `MAX_MISSING_CHUNKS` of the chunks held.
    pub fn check_merge_total(&self, total: usize) -> Result<(), UploadError> {
        if let Some(declared) = self.declared_total_chunks {
            if total != declared {
                return Err(UploadError::InvalidRequest(format!(
                    "totalChunks {} does not match declared {}",
                    total, declared
                )));
            }
        }

        if let Some((&highest, _)) = self.chunks.last_key_value() {
            if highest >= total {
                return Err(UploadError::InvalidRequest(format!(
                    "totalChunks {} would drop received chunk {}",
                    total, highest
                )));
            }
        }

        if total > self.chunks.len().saturating_add(MAX_MISSING_CHUNKS) {
            return Err(UploadError::InvalidRequest(format!(
                "totalChunks {} is far beyond the {} chunks received",
                total,
                self.chunks.len()
            )));
        }

        Ok(())
    }

    /// Every declared chunk is present
    pub fn is_complete(&self) -> bool {
        self.declared_total_chunks
            .is_some_and(|total| self.missing_chunks(total).is_empty())
    }

    /// Validate and store one chunk; the session is untouched on error
    pub fn accept(
        &mut self,
        index: usize,
        bytes: Bytes,
        meta: ChunkMeta,
        max_size: u64,
    ) -> Result<ChunkReceipt, UploadError> {
        if self.status == SessionStatus::Merging {
            return Err(UploadError::SessionBusy(self.id.clone()));
        }

        let total = meta.total_chunks.or(self.declared_total_chunks);
        if let Some(total) = total {
            if index >= total {
                return Err(UploadError::ChunkIndexOutOfBounds { index, total });
            }
        }

        let declared_size = meta.original_file_size.or(self.declared_file_size);
        if let Some(size) = declared_size {
            if size > max_size {
                return Err(UploadError::FileTooLarge { size, max: max_size });
            }
        }

        let replaced = self.chunks.get(&index).map(|c| c.len() as u64).unwrap_or(0);
        let accumulated = self.received_bytes() - replaced + bytes.len() as u64;
        if accumulated > max_size {
            return Err(UploadError::FileTooLarge {
                size: accumulated,
                max: max_size,
            });
        }

        self.declared_total_chunks = total;
        self.declared_file_size = declared_size;
        if meta.original_file_name.is_some() {
            self.original_file_name = meta.original_file_name;
        }
        if meta.original_file_type.is_some() {
            self.original_file_type = meta.original_file_type;
        }
        self.chunks.insert(index, bytes);

        Ok(ChunkReceipt {
            accepted: true,
            received_count: self.chunks.len(),
            total_chunks: self.declared_total_chunks,
        })
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session is merging: {0}")]
    SessionBusy(String),

    #[error("Chunk index out of bounds: {index} (total: {total})")]
    ChunkIndexOutOfBounds { index: usize, total: usize },

    #[error("Missing chunks: {0:?}")]
    MissingChunks(Vec<usize>),

    #[error("Size mismatch: expected {expected} bytes, assembled {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Route(#[from] RouteError),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionNotFound(_) | Self::SessionExpired(_) => StatusCode::NOT_FOUND,
            Self::SessionBusy(_) => StatusCode::CONFLICT,
            Self::ChunkIndexOutOfBounds { .. }
            | Self::MissingChunks(_)
            | Self::SizeMismatch { .. }
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Route(e) => e.status_code(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::SessionBusy(_) => "SESSION_BUSY",
            Self::ChunkIndexOutOfBounds { .. } => "CHUNK_INDEX_OUT_OF_BOUNDS",
            Self::MissingChunks(_) => "CHUNK_MISSING",
            Self::SizeMismatch { .. } => "SIZE_MISMATCH",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Route(e) => e.code(),
        }
    }
}
