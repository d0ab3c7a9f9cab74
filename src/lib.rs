//! Offline-first sync core for the theatre allocation board.
//!
//! The board (theatres, staff and roster date per weekday, plus global
//! settings) lives in an authoritative tree served by [`server`]. Clients
//! talk to it through [`sync::SyncService`], which mirrors every read into
//! a [`cache::LocalCache`] and falls back to it whenever the
//! [`connectivity::ConnectivityMonitor`] reports the server unreachable.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod errors;
pub mod migrate;
pub mod models;
pub mod remote;
pub mod server;
pub mod sync;

pub use config::{Config, SyncConfig};
pub use errors::{AppError, SyncError};
pub use sync::{SyncMode, SyncService, SyncedResource};

#[cfg(test)]
mod tests;
