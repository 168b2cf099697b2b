//! Response caching for intercepted requests.
//!
//! This module provides:
//! - Named, versioned partitions of URL → response entries (SQLite backed)
//! - Request classification into API / navigation / static resource
//! - The network-first and cache-first policies, with offline fallbacks

mod manager;
pub mod partition;
mod router;
mod storage;

pub use manager::{PartitionNames, ResourceCache};
pub use storage::{CacheStorage, SqliteStorage};
