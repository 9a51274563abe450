//! Cache entry envelope and validation outcomes.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A stored value together with the instant it was written.
///
/// Encoded as `{"data": ..., "cachedAt": <unix millis>}`. An entry is never
/// patched in place; writing again replaces it with a new envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
  pub data: T,
  pub cached_at: i64,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, cached_at: i64) -> Self {
    Self { data, cached_at }
  }
}

impl<T: Serialize> CacheEntry<T> {
  /// Serialize to the string value kept in the local store.
  pub fn encode(&self) -> Result<String> {
    serde_json::to_string(self).map_err(|e| eyre!("Failed to encode cache entry: {}", e))
  }
}

impl<T: DeserializeOwned> CacheEntry<T> {
  /// Parse a string value read from the local store.
  pub fn decode(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Failed to decode cache entry: {}", e))
  }
}

/// Result of a validated read.
///
/// `is_valid == false` with `data == None` means there is no usable local copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheValidationResult<T> {
  pub data: Option<T>,
  pub is_valid: bool,
}

impl<T> CacheValidationResult<T> {
  pub fn valid(data: T) -> Self {
    Self {
      data: Some(data),
      is_valid: true,
    }
  }

  pub fn invalid() -> Self {
    Self {
      data: None,
      is_valid: false,
    }
  }
}

/// Outcome of reconciling a local entry against the remote watermark.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
  /// Entry is at least as new as the watermark, or the watermark is unknown
  Fresh(CacheEntry<T>),
  /// Entry predates the watermark; it has already been removed from the store
  Stale(CacheEntry<T>),
  /// Nothing usable was stored
  Missing,
}

impl<T> Validation<T> {
  /// Data of the entry, fresh or stale.
  pub fn into_data(self) -> Option<T> {
    match self {
      Validation::Fresh(entry) | Validation::Stale(entry) => Some(entry.data),
      Validation::Missing => None,
    }
  }

  pub fn is_fresh(&self) -> bool {
    matches!(self, Validation::Fresh(_))
  }
}

impl<T> From<Validation<T>> for CacheValidationResult<T> {
  fn from(validation: Validation<T>) -> Self {
    match validation {
      Validation::Fresh(entry) => CacheValidationResult::valid(entry.data),
      Validation::Stale(_) | Validation::Missing => CacheValidationResult::invalid(),
    }
  }
}
