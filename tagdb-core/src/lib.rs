//! tagdb Core - Tagged Time-Series Storage Engine
//!
//! Stores integer samples for series identified by sets of `key=value`
//! tags, and answers range queries that select and group series by tag.
//!
//! # Architecture
//!
//! - **Catalog**: interns tags and series; resolves tag expressions
//! - **Block**: delta + zig-zag varint encoded runs of samples
//! - **Block store**: per-series block chains, size splits and downsampling
//! - **Cache tier**: leading FULL/MINUTE blocks under optimistic concurrency
//! - **Durable tier**: authoritative store, optionally backed by a WAL
//! - **Query**: per-bucket k-way merge of series streams

pub mod block;
pub mod blockstore;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod encoding;
pub mod query;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{Result, TagDbError};
pub use storage::{Engine, StorageConfig};
pub use types::*;

/// tagdb version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Block payload cap (64KB)
    pub const MAX_BLOCK_BYTES: usize = 1 << 16;

    /// FULL leading block: split once older than a day
    pub const FULL_CACHE_MAX_AGE: i64 = 24 * 60 * 60;

    /// FULL leading block: keep the last 20 minutes after a split
    pub const FULL_CACHE_MIN_AGE: i64 = 20 * 60;

    /// MINUTE leading block: split once older than a day
    pub const MINUTE_CACHE_MAX_AGE: i64 = 24 * 60 * 60;

    /// MINUTE leading block: keep the last 2 hours after a split
    pub const MINUTE_CACHE_MIN_AGE: i64 = 2 * 60 * 60;

    /// WAL segment size (16MB)
    pub const WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;
}
