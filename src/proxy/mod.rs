//! Stateless CDN proxy addressing
//!
//! A proxy address is a self-describing capability token. Minting it needs
//! no storage and no network; the resolver decodes it, checks the signature
//! and fetches `original` (or one of its backups) when a client asks for it.
//!
//! Token layout: URL-safe base64 (no padding) of the compact JSON record,
//! embedded as `/proxy/v1/{token}[.mp4]`.

mod address;

pub use address::{ProxyAddress, ProxyError, ProxySigner, PROXY_PATH_PREFIX};
