//! Media reference types

use serde::{Deserialize, Serialize};

// ============================================================================
// Media Reference
// ============================================================================

/// Role of a media item within the scraped post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaRole {
    /// Regular image
    Image,
    /// Video, including the motion part of a live photo
    Video,
    /// Cover / primary image of the post
    Cover,
}

/// Coarse kind used for batching: covers travel with images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaRole {
    pub fn kind(self) -> MediaKind {
        match self {
            MediaRole::Video => MediaKind::Video,
            MediaRole::Image | MediaRole::Cover => MediaKind::Image,
        }
    }
}

/// An item awaiting processing, as produced by the scraper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    /// Origin URL of the media
    pub url: String,

    /// What the item is within the post
    pub role: MediaRole,

    /// Motion component of a live photo
    #[serde(default)]
    pub is_live_photo_video: bool,
}

impl MediaReference {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: MediaRole::Image,
            is_live_photo_video: false,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: MediaRole::Video,
            is_live_photo_video: false,
        }
    }

    pub fn cover(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: MediaRole::Cover,
            is_live_photo_video: false,
        }
    }

    pub fn live_photo_video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: MediaRole::Video,
            is_live_photo_video: true,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.role.kind()
    }

    /// Last path segment of the URL, without query or fragment
    pub fn file_name(&self) -> Option<String> {
        let without_query = self.url.split(['?', '#']).next().unwrap_or_default();
        let after_scheme = without_query
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(without_query);
        let (_, path) = after_scheme.split_once('/')?;
        let segment = path.rsplit('/').next()?;
        if segment.is_empty() {
            return None;
        }
        Some(
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string()),
        )
    }
}
