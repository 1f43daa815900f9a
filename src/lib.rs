// ABOUTME: Library root for customer-delta-sync
// ABOUTME: Watermark-driven incremental replication into PostgreSQL or SQLite

pub mod commands;
pub mod config;
pub mod delta;
pub mod error;
pub mod postgres;
pub mod sqlite;
pub mod utils;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
