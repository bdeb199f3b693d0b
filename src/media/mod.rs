//! Media model shared by the router, upload protocol and scheduler
//!
//! A `MediaReference` is what the scraper hands over. Everything else here
//! helps decide where the bytes for that reference come from and what they are.

mod platform;
mod sniff;
mod types;

pub(crate) use platform::host_matches;
pub use platform::Platform;
pub use sniff::{content_type_for, extension_for, sniff_content_type};
pub use types::*;
