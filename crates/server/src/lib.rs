//! Lodestone server.
//!
//! Wires the metadata subsystem, the query factories, and the store
//! boundaries into per-request query runners behind a single
//! [`SessionManager::execute`](session::SessionManager) dispatcher, and
//! exposes the `/v1` HTTP/JSON gateway on top.

pub mod api;
pub mod gateway;
pub mod indexer;
pub mod keygen;
pub mod reader;
pub mod runners;
pub mod search_reader;
pub mod session;

pub use session::{ServerOptions, SessionManager};
