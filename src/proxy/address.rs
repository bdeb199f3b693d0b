//! Proxy address minting and verification

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::media::Platform;

type HmacSha256 = Hmac<Sha256>;

/// Path segment preceding the token
pub const PROXY_PATH_PREFIX: &str = "/proxy/v1/";

const VIDEO_SUFFIX: &str = ".mp4";

// ============================================================================
// Types
// ============================================================================

/// Decoded proxy address record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyAddress {
    /// Origin URL fetched at resolution time
    pub original: String,

    /// File name presented to clients
    pub filename: String,

    /// Mint time, unix milliseconds
    #[serde(rename = "timestamp")]
    pub created_at: i64,

    /// Platform the original belongs to
    pub source: Platform,

    /// Alternate origins tried in order when `original` fails
    pub backup_urls: Vec<String>,

    /// Lowercase hex HMAC-SHA256
    pub signature: String,
}

/// Proxy token errors
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Failed to encode proxy address: {0}")]
    Encode(String),

    #[error("Malformed proxy token: {0}")]
    Malformed(String),

    #[error("Proxy token signature mismatch")]
    Tampered,

    #[error("Proxy token expired (age {age_ms}ms exceeds {max_age_ms}ms)")]
    Expired { age_ms: i64, max_age_ms: i64 },
}

impl ProxyError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Tampered => StatusCode::FORBIDDEN,
            Self::Expired { .. } => StatusCode::GONE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Encode(_) => "PROXY_MINT_FAILED",
            Self::Malformed(_) => "PROXY_TOKEN_MALFORMED",
            Self::Tampered => "PROXY_TOKEN_TAMPERED",
            Self::Expired { .. } => "PROXY_TOKEN_EXPIRED",
        }
    }
}

// ============================================================================
// Signer
// ============================================================================

/// Mints and verifies proxy tokens with a server-held secret
#[derive(Clone)]
pub struct ProxySigner {
    secret: Vec<u8>,
    public_base_url: String,
}

impl std::fmt::Debug for ProxySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySigner")
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

impl ProxySigner {
    pub fn new(secret: impl Into<Vec<u8>>, public_base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Mint a token stamped with the current time
    pub fn mint(
        &self,
        original: &str,
        filename: &str,
        source: Platform,
        backup_urls: &[String],
    ) -> Result<String, ProxyError> {
        self.mint_at(original, filename, source, backup_urls, Utc::now().timestamp_millis())
    }

    /// Mint a token with an explicit creation time
    pub fn mint_at(
        &self,
        original: &str,
        filename: &str,
        source: Platform,
        backup_urls: &[String],
        created_at: i64,
    ) -> Result<String, ProxyError> {
        if original.is_empty() {
            return Err(ProxyError::Encode("original URL is empty".to_string()));
        }

        let signature = self.sign(original, filename, created_at, source, backup_urls)?;
        let record = ProxyAddress {
            original: original.to_string(),
            filename: filename.to_string(),
            created_at,
            source,
            backup_urls: backup_urls.to_vec(),
            signature,
        };

        let json = serde_json::to_vec(&record).map_err(|e| ProxyError::Encode(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Full public address for a token
    pub fn address_for(&self, token: &str, is_video: bool) -> String {
        let suffix = if is_video { VIDEO_SUFFIX } else { "" };
        format!("{}{}{}{}", self.public_base_url, PROXY_PATH_PREFIX, token, suffix)
    }

    /// Decode a token (or full address) and verify its signature and age
    pub fn decode(&self, token: &str, max_age: Option<Duration>) -> Result<ProxyAddress, ProxyError> {
        let token = strip_address(token);
        if token.is_empty() {
            return Err(ProxyError::Malformed("empty token".to_string()));
        }

        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| ProxyError::Malformed(e.to_string()))?;
        let record: ProxyAddress =
            serde_json::from_slice(&json).map_err(|e| ProxyError::Malformed(e.to_string()))?;

        self.verify(&record)?;

        if let Some(max_age) = max_age {
            let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
            let age_ms = Utc::now().timestamp_millis() - record.created_at;
            if age_ms > max_age_ms {
                return Err(ProxyError::Expired { age_ms, max_age_ms });
            }
        }

        Ok(record)
    }

    /// Recompute and compare the record's signature
    pub fn verify(&self, record: &ProxyAddress) -> Result<(), ProxyError> {
        // Only the canonical lowercase form is accepted
        if record.signature.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(ProxyError::Tampered);
        }
        let expected = hex::decode(&record.signature).map_err(|_| ProxyError::Tampered)?;

        let mut mac = self.mac()?;
        mac.update(&signing_input(
            &record.original,
            &record.filename,
            record.created_at,
            record.source,
            &record.backup_urls,
        )?);
        mac.verify_slice(&expected).map_err(|_| ProxyError::Tampered)
    }

    fn sign(
        &self,
        original: &str,
        filename: &str,
        created_at: i64,
        source: Platform,
        backup_urls: &[String],
    ) -> Result<String, ProxyError> {
        let mut mac = self.mac()?;
        mac.update(&signing_input(original, filename, created_at, source, backup_urls)?);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256, ProxyError> {
        if self.secret.is_empty() {
            return Err(ProxyError::Encode("signing secret is empty".to_string()));
        }
        HmacSha256::new_from_slice(&self.secret).map_err(|e| ProxyError::Encode(e.to_string()))
    }
}

/// Unambiguous byte encoding of the signed fields
fn signing_input(
    original: &str,
    filename: &str,
    created_at: i64,
    source: Platform,
    backup_urls: &[String],
) -> Result<Vec<u8>, ProxyError> {
    serde_json::to_vec(&(original, filename, created_at, source, backup_urls))
        .map_err(|e| ProxyError::Encode(e.to_string()))
}

/// Accept a bare token, a `/proxy/v1/...` path or a full address
fn strip_address(input: &str) -> &str {
    let token = match input.rfind(PROXY_PATH_PREFIX) {
        Some(pos) => &input[pos + PROXY_PATH_PREFIX.len()..],
        None => input,
    };
    token.strip_suffix(VIDEO_SUFFIX).unwrap_or(token)
}

// ============================================================================
// Tests
// ============================================================================
