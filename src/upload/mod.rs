//! Chunked Upload Protocol
//!
//! Clients that cannot send a large file in one request split it into chunks:
//! 1. Each chunk is posted with a client-chosen session ID and its index
//! 2. The first chunk of an unknown session opens it
//! 3. A merge request reassembles the chunks by ascending index
//! 4. The assembled bytes go to the storage router as a buffered payload

pub mod session;
pub mod types;

pub use session::SessionManager;
pub use types::*;
