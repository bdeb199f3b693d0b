//! Image-hosting backend client
//!
//! The backend exposes a bearer-token login and a single-file multipart
//! upload. Credentials live in an explicit `CredentialProvider` handed to the
//! client, and upload responses are decoded through a fixed list of known
//! shapes.

mod client;
mod credentials;
mod response;

pub use client::{HostingBackend, ImageHostClient};
pub use credentials::{Credential, CredentialProvider};
pub use response::{decode_upload_response, UploadResponse};

/// Hosting backend errors
#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unrecognized upload response: {0}")]
    UnrecognizedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
