//! Origin access
//!
//! Social CDNs block hotlinking, redirect freely and often omit
//! `Content-Length` on `HEAD`. The origin client presents the platform's
//! referer, follows redirects, and falls back to a one-byte range request
//! when the size is not advertised.

mod client;

pub use client::{FetchedMedia, HttpOrigin, MediaOrigin};

use crate::media::Platform;

/// Origin access errors
#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("Origin did not report a size for {0}")]
    SizeUnavailable(String),

    #[error("Origin returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Origin body for {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Request context for one origin call
#[derive(Debug, Clone, Copy)]
pub struct OriginRequest<'a> {
    pub url: &'a str,
    pub platform: Platform,
}
