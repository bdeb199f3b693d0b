//! Origin client trait and reqwest implementation

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE, REFERER};

use super::{OriginError, OriginRequest};

/// Media bytes pulled from an origin
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    /// URL after redirects
    pub final_url: String,
}

/// Access to media origins
#[async_trait]
pub trait MediaOrigin: Send + Sync {
    /// Total size of the resource in bytes
    async fn probe_size(&self, request: OriginRequest<'_>) -> Result<u64, OriginError>;

    /// Full resource bytes, failing once the body passes `max_bytes`
    async fn fetch(
        &self,
        request: OriginRequest<'_>,
        max_bytes: u64,
    ) -> Result<FetchedMedia, OriginError>;
}

/// reqwest-backed origin client
#[derive(Clone)]
pub struct HttpOrigin {
    http: reqwest::Client,
}

impl HttpOrigin {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, OriginError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn headers(request: &OriginRequest<'_>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(referer) = request.platform.referer() {
            headers.insert(REFERER, HeaderValue::from_static(referer));
        }
        headers
    }

    async fn head_length(&self, request: &OriginRequest<'_>) -> Result<Option<u64>, OriginError> {
        let response = self
            .http
            .head(request.url)
            .headers(Self::headers(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|len| *len > 0))
    }

    async fn range_length(&self, request: &OriginRequest<'_>) -> Result<Option<u64>, OriginError> {
        let response = self
            .http
            .get(request.url)
            .headers(Self::headers(request))
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        Ok(response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total))
    }
}

#[async_trait]
impl MediaOrigin for HttpOrigin {
    async fn probe_size(&self, request: OriginRequest<'_>) -> Result<u64, OriginError> {
        if let Some(len) = self.head_length(&request).await? {
            return Ok(len);
        }

        tracing::debug!(url = %request.url, "HEAD gave no length, trying range probe");

        self.range_length(&request)
            .await?
            .ok_or_else(|| OriginError::SizeUnavailable(request.url.to_string()))
    }

    async fn fetch(
        &self,
        request: OriginRequest<'_>,
        max_bytes: u64,
    ) -> Result<FetchedMedia, OriginError> {
        let mut response = self
            .http
            .get(request.url)
            .headers(Self::headers(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OriginError::Status {
                url: request.url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let too_large = || OriginError::TooLarge {
            url: request.url.to_string(),
            limit: max_bytes,
        };

        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                tracing::warn!(
                    url = %request.url,
                    limit = max_bytes,
                    "Origin body larger than probed, aborting fetch"
                );
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        let bytes = body.freeze();

        Ok(FetchedMedia {
            bytes,
            content_type,
            final_url,
        })
    }
}

/// Total from `bytes 0-0/12345`; `*` totals are unknown
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse::<u64>().ok().filter(|len| *len > 0)
}
