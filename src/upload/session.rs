//! Upload Session Manager
//!
//! Manages chunk sessions with:
//! - In-memory session storage behind a `RwLock`
//! - Ordered reassembly and handoff to the storage router
//! - Automatic expiry cleanup

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::media::{content_type_for, MediaReference};
use crate::router::{BufferedPayload, MediaRouter, Payload};

use super::types::{
    ChunkMeta, ChunkReceipt, MergeOutcome, MergeRequest, SessionStatus, UploadError,
    UploadSession, DEFAULT_CHUNK_UPLOAD_CEILING, DEFAULT_SESSION_TTL_SECS,
};

// ============================================================================
// Session Manager
// ============================================================================

/// Manages upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    /// Sessions indexed by client-chosen ID
    sessions: RwLock<HashMap<String, UploadSession>>,

    /// Session lifetime from creation
    ttl: chrono::Duration,

    /// Per-session byte ceiling
    max_size: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_limits(
            chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            DEFAULT_CHUNK_UPLOAD_CEILING,
        )
    }

    pub fn with_limits(ttl: chrono::Duration, max_size: u64) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: RwLock::new(HashMap::new()),
                ttl,
                max_size,
            }),
        }
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Store a chunk, creating the session on first contact
    pub async fn put_chunk(
        &self,
        session_id: &str,
        index: usize,
        bytes: bytes::Bytes,
        meta: ChunkMeta,
    ) -> Result<ChunkReceipt, UploadError> {
        if session_id.trim().is_empty() {
            return Err(UploadError::InvalidRequest("sessionId is required".to_string()));
        }

        let size = bytes.len();
        let mut sessions = self.inner.sessions.write().await;

        if sessions.get(session_id).is_some_and(|s| s.is_expired()) {
            sessions.remove(session_id);
            return Err(UploadError::SessionExpired(session_id.to_string()));
        }

        let receipt = match sessions.get_mut(session_id) {
            Some(session) => session.accept(index, bytes, meta, self.inner.max_size)?,
            None => {
                let mut session = UploadSession::new(session_id, self.inner.ttl);
                let receipt = session.accept(index, bytes, meta, self.inner.max_size)?;
                sessions.insert(session_id.to_string(), session);
                tracing::info!(session_id = %session_id, "Created upload session");
                receipt
            }
        };

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            size = size,
            received = receipt.received_count,
            total = ?receipt.total_chunks,
            "Chunk received"
        );

        Ok(receipt)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Assemble all chunks in index order and route the result
    pub async fn merge(
        &self,
        request: MergeRequest,
        router: &dyn MediaRouter,
    ) -> Result<MergeOutcome, UploadError> {
        if request.total_chunks == 0 {
            return Err(UploadError::InvalidRequest("totalChunks must be positive".to_string()));
        }
        if request.file_name.trim().is_empty() {
            return Err(UploadError::InvalidRequest("fileName is required".to_string()));
        }

        let session_id = request.session_id.as_str();
        let (bytes, fallback_type) = {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.get(session_id).is_some_and(|s| s.is_expired()) {
                sessions.remove(session_id);
                return Err(UploadError::SessionExpired(session_id.to_string()));
            }

            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
            if session.status == SessionStatus::Merging {
                return Err(UploadError::SessionBusy(session_id.to_string()));
            }

            session.check_merge_total(request.total_chunks)?;

            let missing = session.missing_chunks(request.total_chunks);
            if !missing.is_empty() {
                tracing::info!(
                    session_id = %session_id,
                    missing = ?missing,
                    "Merge requested with chunks missing"
                );
                return Err(UploadError::MissingChunks(missing));
            }

            let mut assembled = BytesMut::new();
            for chunk in session.chunks.range(..request.total_chunks).map(|(_, c)| c) {
                assembled.extend_from_slice(chunk);
            }
            let actual = assembled.len() as u64;

            if let Some(expected) = request.file_size {
                if expected != actual {
                    return Err(UploadError::SizeMismatch { expected, actual });
                }
            }

            session.status = SessionStatus::Merging;
            (assembled.freeze(), session.original_file_type.clone())
        };

        let guard = MergeGuard {
            inner: self.inner.clone(),
            session_id: session_id.to_string(),
            armed: true,
        };

        let size = bytes.len() as u64;
        let content_type = request
            .file_type
            .or(fallback_type)
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| content_type_for(&bytes, Some(&request.file_name)));

        let url = format!("upload://{}/{}", session_id, request.file_name);
        let item = if content_type.starts_with("video/") {
            MediaReference::video(url)
        } else {
            MediaReference::image(url)
        };

        tracing::info!(
            session_id = %session_id,
            file_name = %request.file_name,
            size = size,
            content_type = %content_type,
            "Merged upload session"
        );

        let payload = Payload::Buffered(BufferedPayload {
            bytes,
            content_type: Some(content_type.clone()),
            file_name: request.file_name.clone(),
        });

        let routed = router.route(&item, payload).await;
        guard.disarm();

        match routed {
            Ok(address) => {
                self.finish(session_id, SessionStatus::Complete).await;
                Ok(MergeOutcome {
                    address,
                    name: request.file_name,
                    size,
                    content_type,
                })
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    code = e.code(),
                    error = %e,
                    "Routing merged upload failed"
                );
                self.finish(session_id, SessionStatus::Failed).await;
                Err(UploadError::Route(e))
            }
        }
    }

    /// Record the terminal state and drop the session
    async fn finish(&self, session_id: &str, status: SessionStatus) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.status = status;
        }
        if let Some(session) = sessions.remove(session_id) {
            tracing::info!(
                session_id = %session_id,
                status = ?session.status,
                chunks = session.chunks.len(),
                "Upload session closed"
            );
        }
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    pub async fn get_session(&self, session_id: &str) -> Result<UploadSession, UploadError> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove expired sessions, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.inner.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.expires_at >= now;
            if !keep {
                tracing::debug!(session_id = %id, chunks = session.chunks.len(), "Cleaned up expired session");
            }
            keep
        });
        let count = before - sessions.len();

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired upload sessions");
        }

        count
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300)); // 5 minutes

            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        })
    }
}

/// Return a session stuck in `Merging` to `Open`
fn reopen(sessions: &mut HashMap<String, UploadSession>, session_id: &str) {
    if let Some(session) = sessions
        .get_mut(session_id)
        .filter(|s| s.status == SessionStatus::Merging)
    {
        session.status = SessionStatus::Open;
        tracing::warn!(session_id = %session_id, "Merge abandoned while routing, session reopened");
    }
}

/// Reopens the session if a merge is dropped before routing finishes
struct MergeGuard {
    inner: Arc<SessionManagerInner>,
    session_id: String,
    armed: bool,
}

impl MergeGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for MergeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Ok(mut sessions) = self.inner.sessions.try_write() {
            reopen(&mut sessions, &self.session_id);
            return;
        }

        let inner = self.inner.clone();
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    reopen(&mut *inner.sessions.write().await, &session_id);
                });
            }
            Err(_) => tracing::warn!(
                session_id = %session_id,
                "No runtime to reopen abandoned merge; session waits for expiry"
            ),
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
