//! Rehost
//!
//! Media acquisition and storage routing for hotlink-protected origins: a
//! storage router that uploads or defers each item, a chunked upload protocol
//! for large payloads, signed stateless proxy addresses, and a batch scheduler
//! with resumable task state.

pub mod config;
pub mod db;
pub mod error;
pub mod hosting;
pub mod media;
pub mod origin;
pub mod proxy;
pub mod router;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;
