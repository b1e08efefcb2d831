//! # courant-store
//!
//! Local durable cache for the client, backed by SQLite.
//!
//! The cache mirrors each conversation as a full ordered message list so the
//! UI gets a zero-latency first paint while the authoritative store is
//! re-fetched in the background (stale-while-revalidate). The crate exposes
//! a synchronous `Database` handle that wraps a `rusqlite::Connection`.

pub mod cache;
pub mod database;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
