//! Local caching layer for daily snapshots.
//!
//! This module provides the `CacheManager`, which:
//! - Derives one store key per (resource type, service date)
//! - Wraps stored values in a `{data, cachedAt}` envelope
//! - Decides whether a stored entry is still authoritative by comparing its
//!   `cachedAt` against the remote last-updated watermark
//! - Treats every local store failure as a cache miss rather than an error

mod entry;
mod key;
mod manager;
mod storage;
mod traits;

pub use entry::{CacheEntry, CacheValidationResult, Validation};
pub use key::{
  generate_cache_key, parse_cache_key, service_date, service_date_from_millis,
  ResourceType, CACHE_KEY_PREFIX, SERVICE_UTC_OFFSET_SECS,
};
pub use manager::{CacheManager, Clock};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{BatchMetadata, DailyResource, LocalStore, MetadataFetcher};
