//! Storage router
//!
//! Decision order for one item:
//! 1. Establish the size (exact for buffered bytes, probed otherwise). No
//!    size, no decision.
//! 2. Live-photo videos always go direct.
//! 3. Below the inline ceiling: fetch once, upload once.
//! 4. At or above it, on a proxy-capable platform: mint a proxy address
//!    without touching the bytes.
//! 5. Anything else is rejected.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::hosting::HostingBackend;
use crate::media::{
    content_type_for, extension_for, host_matches, MediaKind, MediaReference, Platform,
};
use crate::origin::{MediaOrigin, OriginRequest};
use crate::proxy::ProxySigner;

use super::types::{
    Address, BufferedPayload, MediaRouter, Payload, ProbeHints, RouteError, RoutingPolicy,
};

/// Second-level labels under which the registrable domain has three labels
const SHARED_SECOND_LEVEL: &[&str] = &["com", "net", "org", "gov", "edu", "co", "ac"];

/// Routes media items to the hosting backend or a proxy address
pub struct StorageRouter {
    origin: Arc<dyn MediaOrigin>,
    backend: Arc<dyn HostingBackend>,
    signer: ProxySigner,
    policy: RoutingPolicy,
}

impl StorageRouter {
    pub fn new(
        origin: Arc<dyn MediaOrigin>,
        backend: Arc<dyn HostingBackend>,
        signer: ProxySigner,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            origin,
            backend,
            signer,
            policy,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    async fn route_buffered(
        &self,
        item: &MediaReference,
        payload: BufferedPayload,
    ) -> Result<Address, RouteError> {
        let size = payload.bytes.len() as u64;
        self.check_direct_ceiling(size, Platform::Unknown)?;

        tracing::info!(
            file_name = %payload.file_name,
            size = size,
            decision = "direct",
            "Routing buffered payload"
        );

        let content_type = payload
            .content_type
            .filter(|ct| !is_generic(ct))
            .unwrap_or_else(|| content_type_for(&payload.bytes, Some(&payload.file_name)));
        self.upload(item, payload.bytes, &payload.file_name, &content_type)
            .await
    }

    async fn route_remote(
        &self,
        item: &MediaReference,
        hints: ProbeHints,
    ) -> Result<Address, RouteError> {
        let platform = hints
            .platform
            .filter(|p| *p != Platform::Unknown)
            .unwrap_or_else(|| Platform::detect(&item.url));
        let request = OriginRequest {
            url: &item.url,
            platform,
        };

        let size = self
            .origin
            .probe_size(request)
            .await
            .map_err(|e| RouteError::SizeUnknown {
                url: item.url.clone(),
                reason: e.to_string(),
            })?;

        if item.is_live_photo_video {
            self.check_direct_ceiling(size, platform)?;
            tracing::info!(url = %item.url, size = size, decision = "direct", "Live photo video forced direct");
            return self
                .fetch_and_upload(item, request, self.fetch_limit(size))
                .await;
        }

        if size < self.policy.inline_ceiling {
            tracing::info!(url = %item.url, size = size, decision = "direct", "Routing inline item");
            return self
                .fetch_and_upload(item, request, self.fetch_limit(size))
                .await;
        }

        if self.policy.supports_proxy(platform) {
            tracing::info!(
                url = %item.url,
                size = size,
                platform = %platform,
                decision = "proxy",
                "Routing oversized item through proxy"
            );
            return Ok(self.mint_proxy(item, platform, &hints.backup_urls));
        }

        Err(RouteError::UnsupportedLargeFile {
            size,
            limit: self.policy.inline_ceiling,
            platform,
        })
    }

    fn check_direct_ceiling(&self, size: u64, platform: Platform) -> Result<(), RouteError> {
        if size >= self.policy.inline_ceiling && size > self.policy.oversized_ceiling {
            return Err(RouteError::UnsupportedLargeFile {
                size,
                limit: self.policy.oversized_ceiling,
                platform,
            });
        }
        Ok(())
    }

    /// Largest body accepted for an item probed at `size`
    fn fetch_limit(&self, size: u64) -> u64 {
        if size < self.policy.inline_ceiling {
            self.policy.inline_ceiling.saturating_sub(1)
        } else {
            self.policy.oversized_ceiling
        }
    }

    async fn fetch_and_upload(
        &self,
        item: &MediaReference,
        request: OriginRequest<'_>,
        max_bytes: u64,
    ) -> Result<Address, RouteError> {
        let fetched = self.origin.fetch(request, max_bytes).await?;

        let base_name = item.file_name().unwrap_or_else(|| default_name(item));
        let content_type = fetched
            .content_type
            .filter(|ct| !is_generic(ct))
            .unwrap_or_else(|| content_type_for(&fetched.bytes, Some(&base_name)));
        let file_name = with_extension(&base_name, &content_type);

        self.upload(item, fetched.bytes, &file_name, &content_type)
            .await
    }

    async fn upload(
        &self,
        item: &MediaReference,
        bytes: Bytes,
        file_name: &str,
        content_type: &str,
    ) -> Result<Address, RouteError> {
        let url = self.backend.upload(bytes, file_name, content_type).await?;
        verify_not_passthrough(&url, &item.url)?;
        Ok(Address::Direct(url))
    }

    fn mint_proxy(&self, item: &MediaReference, platform: Platform, backups: &[String]) -> Address {
        let filename = item.file_name().unwrap_or_else(|| default_name(item));
        match self.signer.mint(&item.url, &filename, platform, backups) {
            Ok(token) => Address::Proxy(
                self.signer
                    .address_for(&token, item.kind() == MediaKind::Video),
            ),
            Err(e) => {
                tracing::warn!(
                    url = %item.url,
                    error = %e,
                    "Proxy mint failed, returning origin URL (degraded)"
                );
                Address::Origin(item.url.clone())
            }
        }
    }
}

#[async_trait]
impl MediaRouter for StorageRouter {
    async fn route(&self, item: &MediaReference, payload: Payload) -> Result<Address, RouteError> {
        match payload {
            Payload::Buffered(buffered) => self.route_buffered(item, buffered).await,
            Payload::Probe(hints) => self.route_remote(item, hints).await,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reject upload results that still point at the origin
fn verify_not_passthrough(address: &str, origin: &str) -> Result<(), RouteError> {
    let passthrough = || RouteError::PassthroughDetected {
        address: address.to_string(),
        origin: origin.to_string(),
    };

    if address.trim() == origin.trim() {
        tracing::warn!(address = %address, "Upload returned the origin URL unchanged");
        return Err(passthrough());
    }

    let host = |url: &str| {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    };

    if let (Some(address_host), Some(origin_host)) = (host(address), host(origin)) {
        if host_matches(&address_host, &origin_host)
            || host_matches(&address_host, registrable_domain(&origin_host))
        {
            tracing::warn!(
                address = %address,
                origin_host = %origin_host,
                "Upload returned an address on the origin's domain"
            );
            return Err(passthrough());
        }
    }

    Ok(())
}

/// Naive registrable domain: last two labels, three under shared SLDs
fn registrable_domain(host: &str) -> &str {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let keep = if SHARED_SECOND_LEVEL.contains(&labels[labels.len() - 2]) {
        3
    } else {
        2
    };
    if labels.len() <= keep {
        return host;
    }
    let skip: usize = labels[..labels.len() - keep].iter().map(|l| l.len() + 1).sum();
    &host[skip..]
}

fn is_generic(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.is_empty() || essence == "application/octet-stream" || essence == "binary/octet-stream"
}

fn default_name(item: &MediaReference) -> String {
    let stem = match item.kind() {
        MediaKind::Video => "video",
        MediaKind::Image => "image",
    };
    format!("{}-{}", stem, uuid::Uuid::new_v4().simple())
}

fn with_extension(name: &str, content_type: &str) -> String {
    if name.rsplit_once('.').is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty()) {
        return name.to_string();
    }
    match extension_for(content_type) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::OriginError;
    use crate::testing::{FakeBackend, FakeOrigin};
    use std::sync::atomic::Ordering;

    const MB: u64 = 1024 * 1024;

    fn router(origin: Arc<FakeOrigin>, backend: Arc<FakeBackend>) -> StorageRouter {
        StorageRouter::new(
            origin,
            backend,
            ProxySigner::new(b"secret".to_vec(), "https://media.example"),
            RoutingPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_small_item_uploads_directly() {
        let origin = Arc::new(FakeOrigin::with_size(2 * MB));
        let backend = Arc::new(FakeBackend::new());
        let router = router(origin.clone(), backend.clone());

        let address = router
            .route(&MediaReference::image("https://wx1.sinaimg.cn/large/a.jpg"), Payload::probe())
            .await
            .unwrap();

        assert!(matches!(address, Address::Direct(_)));
        assert_eq!(origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sizes_below_inline_ceiling_go_direct() {
        for size in [1, MB, 19 * MB - 1] {
            let origin = Arc::new(FakeOrigin::with_size(size));
            let backend = Arc::new(FakeBackend::new());
            let address = router(origin.clone(), backend.clone())
                .route(&MediaReference::video("https://v.douyinvod.com/a.mp4"), Payload::probe())
                .await
                .unwrap();

            assert!(matches!(address, Address::Direct(_)), "size {}", size);
            assert_eq!(backend.uploads.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_large_item_on_proxy_platform_mints_without_fetch() {
        for size in [19 * MB, 50 * MB, 500 * MB] {
            let origin = Arc::new(FakeOrigin::with_size(size));
            let backend = Arc::new(FakeBackend::new());
            let router = router(origin.clone(), backend.clone());

            let address = router
                .route(
                    &MediaReference::video("https://v26.douyinvod.com/x/a.mp4"),
                    Payload::Probe(ProbeHints {
                        platform: None,
                        backup_urls: vec!["https://v3.douyinvod.com/x/a.mp4".to_string()],
                    }),
                )
                .await
                .unwrap();

            assert!(address.is_proxy());
            assert!(address.url().starts_with("https://media.example/proxy/v1/"));
            assert!(address.url().ends_with(".mp4"));
            assert_eq!(origin.fetches.load(Ordering::SeqCst), 0);
            assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);

            let decoded = router.signer.decode(address.url(), None).unwrap();
            assert_eq!(decoded.original, "https://v26.douyinvod.com/x/a.mp4");
            assert_eq!(decoded.source, Platform::Douyin);
            assert_eq!(decoded.backup_urls.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_platform_hint_overrides_detection() {
        let origin = Arc::new(FakeOrigin::with_size(40 * MB));
        let router = router(origin, Arc::new(FakeBackend::new()));

        let address = router
            .route(
                &MediaReference::video("https://cdn.example/a.mp4"),
                Payload::Probe(ProbeHints {
                    platform: Some(Platform::Xiaohongshu),
                    backup_urls: Vec::new(),
                }),
            )
            .await
            .unwrap();

        assert!(address.is_proxy());
    }

    #[tokio::test]
    async fn test_live_photo_is_never_proxied() {
        for size in [MB, 19 * MB, 60 * MB, 500 * MB] {
            let origin = Arc::new(FakeOrigin::with_size(size));
            let backend = Arc::new(FakeBackend::new());
            let result = router(origin.clone(), backend.clone())
                .route(
                    &MediaReference::live_photo_video("https://sns-video.xhscdn.com/live.mp4"),
                    Payload::probe(),
                )
                .await;

            match result {
                Ok(address) => assert!(matches!(address, Address::Direct(_)), "size {}", size),
                Err(e) => assert!(
                    matches!(e, RouteError::UnsupportedLargeFile { .. }),
                    "size {}: {}",
                    size,
                    e
                ),
            }
        }
    }

    #[tokio::test]
    async fn test_live_photo_large_goes_direct() {
        let origin = Arc::new(FakeOrigin::with_size(60 * MB));
        let backend = Arc::new(FakeBackend::new());
        let address = router(origin.clone(), backend.clone())
            .route(
                &MediaReference::live_photo_video("https://sns-video.xhscdn.com/live.mp4"),
                Payload::probe(),
            )
            .await
            .unwrap();

        assert!(matches!(address, Address::Direct(_)));
        assert_eq!(origin.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_large_file_fails() {
        let origin = Arc::new(FakeOrigin::with_size(30 * MB));
        let backend = Arc::new(FakeBackend::new());
        let err = router(origin.clone(), backend.clone())
            .route(&MediaReference::video("https://cdn.example/a.mp4"), Payload::probe())
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::UnsupportedLargeFile { .. }));
        assert_eq!(origin.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_size_fails() {
        let origin = Arc::new(FakeOrigin::without_size());
        let backend = Arc::new(FakeBackend::new());

        for item in [
            MediaReference::image("https://wx1.sinaimg.cn/a.jpg"),
            MediaReference::live_photo_video("https://sns-video.xhscdn.com/live.mp4"),
        ] {
            let err = router(origin.clone(), backend.clone())
                .route(&item, Payload::probe())
                .await
                .unwrap_err();
            assert!(matches!(err, RouteError::SizeUnknown { .. }));
        }

        assert_eq!(origin.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_passthrough_is_upload_failure() {
        let url = "https://wx1.sinaimg.cn/large/a.jpg";
        let origin = Arc::new(FakeOrigin::with_size(MB));

        let same = Arc::new(FakeBackend::returning(url));
        let err = router(origin.clone(), same)
            .route(&MediaReference::image(url), Payload::probe())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::PassthroughDetected { .. }));
        assert!(err.is_upload_failure());

        let sibling = Arc::new(FakeBackend::returning("https://wx4.sinaimg.cn/large/a.jpg"));
        let err = router(origin, sibling)
            .route(&MediaReference::image(url), Payload::probe())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::PassthroughDetected { .. }));
    }

    #[tokio::test]
    async fn test_backend_failure_is_upload_failed() {
        let origin = Arc::new(FakeOrigin::with_size(MB));
        let err = router(origin, Arc::new(FakeBackend::failing()))
            .route(&MediaReference::image("https://wx1.sinaimg.cn/a.jpg"), Payload::probe())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::UploadFailed(_)));
    }

    #[tokio::test]
    async fn test_buffered_payload_skips_origin() {
        let origin = Arc::new(FakeOrigin::without_size());
        let backend = Arc::new(FakeBackend::new());
        let payload = Payload::Buffered(BufferedPayload {
            bytes: Bytes::from(vec![0u8; 25 * MB as usize]),
            content_type: Some("video/mp4".to_string()),
            file_name: "big.mp4".to_string(),
        });

        let address = router(origin.clone(), backend.clone())
            .route(&MediaReference::video("upload://session/big.mp4"), payload)
            .await
            .unwrap();

        assert!(matches!(address, Address::Direct(_)));
        assert_eq!(origin.probes.load(Ordering::SeqCst), 0);
        assert_eq!(origin.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            backend.last_upload().unwrap(),
            ("big.mp4".to_string(), "video/mp4".to_string(), 25 * MB as usize)
        );
    }

    #[tokio::test]
    async fn test_buffered_over_oversized_ceiling_fails() {
        let policy = RoutingPolicy {
            inline_ceiling: 10,
            oversized_ceiling: 100,
            ..RoutingPolicy::default()
        };
        let router = StorageRouter::new(
            Arc::new(FakeOrigin::without_size()),
            Arc::new(FakeBackend::new()),
            ProxySigner::new(b"secret".to_vec(), "https://media.example"),
            policy,
        );
        let payload = Payload::Buffered(BufferedPayload {
            bytes: Bytes::from(vec![0u8; 101]),
            content_type: None,
            file_name: "x.bin".to_string(),
        });

        let err = router
            .route(&MediaReference::video("upload://s/x.bin"), payload)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::UnsupportedLargeFile { limit: 100, .. }));
    }

    #[tokio::test]
    async fn test_mint_failure_degrades_to_origin() {
        let router = StorageRouter::new(
            Arc::new(FakeOrigin::with_size(50 * MB)),
            Arc::new(FakeBackend::new()),
            ProxySigner::new(Vec::new(), "https://media.example"),
            RoutingPolicy::default(),
        );

        let url = "https://v26.douyinvod.com/a.mp4";
        let address = router
            .route(&MediaReference::video(url), Payload::probe())
            .await
            .unwrap();
        assert_eq!(address, Address::Origin(url.to_string()));
        assert!(address.is_degraded());
    }

    #[tokio::test]
    async fn test_body_larger_than_probe_is_not_uploaded() {
        let origin = Arc::new(
            FakeOrigin::with_size(1024).body(Bytes::from(vec![0u8; 20 * MB as usize])),
        );
        let backend = Arc::new(FakeBackend::new());
        let err = router(origin, backend.clone())
            .route(&MediaReference::image("https://wx1.sinaimg.cn/large/a.jpg"), Payload::probe())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RouteError::Origin(OriginError::TooLarge { limit, .. }) if limit == 19 * MB - 1
        ));
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetched_type_and_extension() {
        let origin = Arc::new(FakeOrigin::with_size(MB).content_type("application/octet-stream"));
        let backend = Arc::new(FakeBackend::new());
        router(origin, backend.clone())
            .route(&MediaReference::image("https://wx1.sinaimg.cn/large/noext"), Payload::probe())
            .await
            .unwrap();

        let (name, content_type, _) = backend.last_upload().unwrap();
        assert_eq!(content_type, "image/jpeg");
        assert_eq!(name, "noext.jpg");
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("wx1.sinaimg.cn"), "sinaimg.cn");
        assert_eq!(registrable_domain("sinaimg.cn"), "sinaimg.cn");
        assert_eq!(registrable_domain("a.b.example.com.cn"), "example.com.cn");
    }

    #[test]
    fn test_verify_allows_other_hosts() {
        assert!(verify_not_passthrough(
            "https://img.example/file/a.jpg",
            "https://wx1.sinaimg.cn/large/a.jpg"
        )
        .is_ok());
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("a.jpg", "image/png"), "a.jpg");
        assert_eq!(with_extension("a", "image/png"), "a.png");
        assert_eq!(with_extension("a", "application/x-unknown-thing"), "a");
    }
}
