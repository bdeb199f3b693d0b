//! Upload response decoding
//!
//! Hosting backends disagree on where the public URL lives. The known shapes
//! are tried in a fixed priority order; a body matching none of them is an
//! error, never a guessed URL.

use serde::Deserialize;
use serde_json::Value;

use super::HostingError;

#[derive(Debug, Deserialize)]
pub struct SrcEntry {
    pub src: String,
}

#[derive(Debug, Deserialize)]
pub struct UrlBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PathBody {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct DataBody {
    pub data: UrlBody,
}

/// Known upload response shapes
#[derive(Debug)]
pub enum UploadResponse {
    /// `[{"src": "/file/abc.jpg"}]`
    SrcList(Vec<SrcEntry>),
    /// `{"src": "..."}`
    Src(SrcEntry),
    /// `{"url": "..."}`
    Url(UrlBody),
    /// `{"path": "..."}`
    Path(PathBody),
    /// `{"data": {"url": "..."}}`
    Data(DataBody),
}

type ShapeDecoder = fn(&Value) -> Option<UploadResponse>;

/// Shape decoders in priority order
const SHAPES: [ShapeDecoder; 5] = [
    |v| Vec::deserialize(v).ok().map(UploadResponse::SrcList),
    |v| SrcEntry::deserialize(v).ok().map(UploadResponse::Src),
    |v| UrlBody::deserialize(v).ok().map(UploadResponse::Url),
    |v| PathBody::deserialize(v).ok().map(UploadResponse::Path),
    |v| DataBody::deserialize(v).ok().map(UploadResponse::Data),
];

impl UploadResponse {
    /// First shape in priority order that carries a non-empty location
    pub fn decode(value: &Value) -> Option<UploadResponse> {
        SHAPES
            .iter()
            .filter_map(|shape| shape(value))
            .find(|response| response.location().is_some())
    }

    /// The location carried by this shape, possibly relative
    pub fn location(&self) -> Option<&str> {
        let location = match self {
            UploadResponse::SrcList(entries) => entries.first().map(|e| e.src.as_str())?,
            UploadResponse::Src(entry) => &entry.src,
            UploadResponse::Url(body) => &body.url,
            UploadResponse::Path(body) => &body.path,
            UploadResponse::Data(body) => &body.data.url,
        };
        let location = location.trim();
        (!location.is_empty()).then_some(location)
    }
}

/// Decode a response body into an absolute public URL
pub fn decode_upload_response(body: &str, base_url: &str) -> Result<String, HostingError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| HostingError::UnrecognizedResponse(truncate(body)))?;

    let parsed = UploadResponse::decode(&value)
        .ok_or_else(|| HostingError::UnrecognizedResponse(truncate(body)))?;
    let location = parsed
        .location()
        .ok_or_else(|| HostingError::UnrecognizedResponse(truncate(body)))?;

    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }

    let base = reqwest::Url::parse(base_url)
        .map_err(|e| HostingError::UnrecognizedResponse(format!("invalid base URL: {}", e)))?;
    let joined = base
        .join(location)
        .map_err(|e| HostingError::UnrecognizedResponse(format!("{}: {}", location, e)))?;
    Ok(joined.to_string())
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
