//! In-memory fakes for the origin, hosting backend and router

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::hosting::{HostingBackend, HostingError};
use crate::media::MediaReference;
use crate::origin::{FetchedMedia, MediaOrigin, OriginError, OriginRequest};
use crate::router::{Address, MediaRouter, Payload, RouteError};

const JPEG_BYTES: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg";

// ============================================================================
// Origin
// ============================================================================

pub struct FakeOrigin {
    size: Option<u64>,
    content_type: Option<String>,
    body: Bytes,
    pub probes: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeOrigin {
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            content_type: None,
            body: Bytes::from_static(JPEG_BYTES),
            probes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn without_size() -> Self {
        Self {
            size: None,
            ..Self::with_size(0)
        }
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Body served on fetch, regardless of the probed size
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

#[async_trait]
impl MediaOrigin for FakeOrigin {
    async fn probe_size(&self, request: OriginRequest<'_>) -> Result<u64, OriginError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.size
            .ok_or_else(|| OriginError::SizeUnavailable(request.url.to_string()))
    }

    async fn fetch(
        &self,
        request: OriginRequest<'_>,
        max_bytes: u64,
    ) -> Result<FetchedMedia, OriginError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.body.len() as u64 > max_bytes {
            return Err(OriginError::TooLarge {
                url: request.url.to_string(),
                limit: max_bytes,
            });
        }
        Ok(FetchedMedia {
            bytes: self.body.clone(),
            content_type: self.content_type.clone(),
            final_url: request.url.to_string(),
        })
    }
}

// ============================================================================
// Hosting backend
// ============================================================================

pub struct FakeBackend {
    fixed_url: Option<String>,
    fail: bool,
    pub uploads: AtomicUsize,
    last: Mutex<Option<(String, String, usize)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            fixed_url: None,
            fail: false,
            uploads: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    /// Always answers with `url`
    pub fn returning(url: &str) -> Self {
        Self {
            fixed_url: Some(url.to_string()),
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// (file name, content type, length) of the most recent upload
    pub fn last_upload(&self) -> Option<(String, String, usize)> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostingBackend for FakeBackend {
    async fn upload(
        &self,
        bytes: Bytes,
        file_name: &str,
        content_type: &str,
    ) -> Result<String, HostingError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() =
            Some((file_name.to_string(), content_type.to_string(), bytes.len()));

        if self.fail {
            return Err(HostingError::Rejected {
                status: 500,
                message: "backend down".to_string(),
            });
        }

        Ok(self
            .fixed_url
            .clone()
            .unwrap_or_else(|| format!("https://img.example/file/{}", file_name)))
    }
}

// ============================================================================
// Router
// ============================================================================

/// Fails items whose URL contains `fail`, delays items containing `slow`
pub struct FakeRouter {
    slow_delay: Duration,
    routed: Mutex<Vec<String>>,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self {
            slow_delay: Duration::from_millis(20),
            routed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_slow_delay(mut self, delay: Duration) -> Self {
        self.slow_delay = delay;
        self
    }

    pub fn routed_count(&self, url: &str) -> usize {
        self.routed.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl MediaRouter for FakeRouter {
    async fn route(&self, item: &MediaReference, payload: Payload) -> Result<Address, RouteError> {
        if item.url.contains("slow") {
            tokio::time::sleep(self.slow_delay).await;
        }
        self.routed.lock().unwrap().push(item.url.clone());

        if item.url.contains("fail") {
            return Err(RouteError::UploadFailed(HostingError::Rejected {
                status: 500,
                message: format!("cannot store {}", item.url),
            }));
        }

        let name = match payload {
            Payload::Buffered(buffered) => buffered.file_name,
            Payload::Probe(_) => item.file_name().unwrap_or_else(|| "item".to_string()),
        };
        Ok(Address::Direct(format!("https://img.example/r/{}", name)))
    }
}
