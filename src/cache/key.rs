//! Cache key derivation and the service calendar.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};

/// Prefix shared by every key this crate writes to the local store.
pub const CACHE_KEY_PREFIX: &str = "cache_";

/// Offset of the service calendar from UTC (UTC+9).
///
/// "Today" is the same day for every user regardless of device locale.
pub const SERVICE_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// The kinds of daily content tracked independently by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
  News,
  Terms,
}

impl ResourceType {
  pub const ALL: [ResourceType; 2] = [ResourceType::News, ResourceType::Terms];

  /// Tag used inside cache keys.
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceType::News => "news",
      ResourceType::Terms => "terms",
    }
  }
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceType {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "news" => Ok(ResourceType::News),
      "terms" => Ok(ResourceType::Terms),
      other => Err(eyre!("Unknown resource type: {}", other)),
    }
  }
}

/// Build the store key for a (type, date) pair, e.g. `cache_news_2026-01-14`.
///
/// The date is passed through untouched. A malformed date yields a key that
/// simply never matches anything the repository reads.
pub fn generate_cache_key(resource: ResourceType, date: &str) -> String {
  format!("{}{}_{}", CACHE_KEY_PREFIX, resource.as_str(), date)
}

/// Split a key produced by [`generate_cache_key`] back into its parts.
///
/// Returns `None` for keys that were not written by this crate.
pub fn parse_cache_key(key: &str) -> Option<(ResourceType, &str)> {
  let rest = key.strip_prefix(CACHE_KEY_PREFIX)?;
  let (tag, date) = rest.split_once('_')?;
  let resource = tag.parse().ok()?;
  Some((resource, date))
}

/// Calendar date (`YYYY-MM-DD`) of an instant in the service timezone.
pub fn service_date(at: DateTime<Utc>) -> String {
  let local = at.naive_utc() + Duration::seconds(i64::from(SERVICE_UTC_OFFSET_SECS));
  local.format("%Y-%m-%d").to_string()
}

/// Same as [`service_date`] for a Unix timestamp in milliseconds.
pub fn service_date_from_millis(millis: i64) -> String {
  match Utc.timestamp_millis_opt(millis).single() {
    Some(at) => service_date(at),
    None => service_date(DateTime::<Utc>::default()),
  }
}
