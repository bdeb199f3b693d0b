//! Routing types

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hosting::HostingError;
use crate::media::{MediaReference, Platform};
use crate::origin::OriginError;

// ============================================================================
// Address
// ============================================================================

/// Where a media item ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "lowercase")]
pub enum Address {
    /// Uploaded to the hosting backend
    Direct(String),
    /// Minted proxy address; fetched from the origin on access
    Proxy(String),
    /// Degraded: proxy minting failed and the raw origin URL is returned
    Origin(String),
}

impl Address {
    pub fn url(&self) -> &str {
        match self {
            Address::Direct(url) | Address::Proxy(url) | Address::Origin(url) => url,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Address::Proxy(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Address::Origin(_))
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Bytes already held in memory, e.g. a merged chunk session
#[derive(Debug, Clone)]
pub struct BufferedPayload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub file_name: String,
}

/// Caller-supplied hints for items still at their origin
#[derive(Debug, Clone, Default)]
pub struct ProbeHints {
    /// Platform hint; detected from the URL when absent
    pub platform: Option<Platform>,
    /// Alternate origins carried into proxy addresses
    pub backup_urls: Vec<String>,
}

/// What the router has to work with for one item
#[derive(Debug, Clone)]
pub enum Payload {
    Buffered(BufferedPayload),
    Probe(ProbeHints),
}

impl Payload {
    pub fn probe() -> Self {
        Payload::Probe(ProbeHints::default())
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Size thresholds and proxy-capable platforms
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// Below this, items are always uploaded directly
    pub inline_ceiling: u64,
    /// Hard cap for any direct upload at or above `inline_ceiling`
    pub oversized_ceiling: u64,
    /// Platforms whose origins tolerate deferred proxy fetches
    pub proxy_platforms: HashSet<Platform>,
}

impl RoutingPolicy {
    pub fn supports_proxy(&self, platform: Platform) -> bool {
        self.proxy_platforms.contains(&platform)
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            inline_ceiling: 19 * 1024 * 1024,
            oversized_ceiling: 110 * 1024 * 1024,
            proxy_platforms: Platform::KNOWN.into_iter().collect(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Routing errors
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Cannot determine size of {url}: {reason}")]
    SizeUnknown { url: String, reason: String },

    #[error("File of {size} bytes exceeds {limit} bytes and cannot be proxied from {platform}")]
    UnsupportedLargeFile {
        size: u64,
        limit: u64,
        platform: Platform,
    },

    #[error("Upload failed: {0}")]
    UploadFailed(#[from] HostingError),

    #[error("Uploaded address {address} still points at origin {origin}")]
    PassthroughDetected { address: String, origin: String },

    #[error("Origin fetch failed: {0}")]
    Origin(#[from] OriginError),

    #[error("Routing deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl RouteError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::SizeUnknown { .. } => "SIZE_UNKNOWN",
            RouteError::UnsupportedLargeFile { .. } => "UNSUPPORTED_LARGE_FILE",
            RouteError::UploadFailed(HostingError::Auth(_)) => "UPLOAD_AUTH_FAILED",
            RouteError::UploadFailed(_) => "UPLOAD_FAILED",
            RouteError::PassthroughDetected { .. } => "PASSTHROUGH_DETECTED",
            RouteError::Origin(_) => "ORIGIN_FETCH_FAILED",
            RouteError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
        }
    }

    /// HTTP status when surfaced directly to a client
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            RouteError::UploadFailed(HostingError::Auth(_)) => StatusCode::UNAUTHORIZED,
            RouteError::UnsupportedLargeFile { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures the caller may retry with backoff
    pub fn is_upload_failure(&self) -> bool {
        matches!(
            self,
            RouteError::UploadFailed(_) | RouteError::PassthroughDetected { .. }
        )
    }
}

// ============================================================================
// Router Trait
// ============================================================================

/// Turns one media item into an address
#[async_trait]
pub trait MediaRouter: Send + Sync {
    async fn route(&self, item: &MediaReference, payload: Payload) -> Result<Address, RouteError>;
}
