//! Core traits and types for the caching system.

use std::future::Future;

use color_eyre::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::key::ResourceType;

/// Trait for daily payloads that can be cached.
///
/// Implementors name the resource type their cache keys are derived from.
pub trait DailyResource: Clone + Send + Sync + Serialize + DeserializeOwned {
  fn resource_type() -> ResourceType;
}

/// Trait for local key-value persistence backends.
///
/// Keys and values are plain strings. No transactional guarantees are
/// assumed; every operation may fail.
pub trait LocalStore: Send + Sync {
  /// Read the value stored under a key.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Store a value, replacing any previous one.
  fn set(&self, key: &str, value: &str) -> Result<()>;

  /// Remove a key. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// List every stored key.
  fn list_keys(&self) -> Result<Vec<String>>;

  /// Remove several keys at once.
  fn remove_many(&self, keys: &[String]) -> Result<()>;
}

/// Last-write watermarks published by the remote system, in Unix millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
  pub news_last_updated: i64,
  pub terms_last_updated: i64,
}

impl BatchMetadata {
  /// Watermark for a single resource type.
  pub fn last_updated(&self, resource: ResourceType) -> i64 {
    match resource {
      ResourceType::News => self.news_last_updated,
      ResourceType::Terms => self.terms_last_updated,
    }
  }
}

/// Source of remote watermarks.
///
/// Any failure is reported as `None`, never as an error: an unknown watermark
/// makes the cache manager trust the local copy.
pub trait MetadataFetcher: Send + Sync {
  fn fetch_metadata(&self) -> impl Future<Output = Option<BatchMetadata>> + Send;
}

impl<F, Fut> MetadataFetcher for F
where
  F: Fn() -> Fut + Send + Sync,
  Fut: Future<Output = Option<BatchMetadata>> + Send,
{
  fn fetch_metadata(&self) -> impl Future<Output = Option<BatchMetadata>> + Send {
    self()
  }
}
