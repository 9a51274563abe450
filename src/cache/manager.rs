//! Cache manager: entry persistence and watermark reconciliation.

use std::sync::Arc;

use chrono::Utc;
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, CacheValidationResult, Validation};
use super::key::{
  generate_cache_key, parse_cache_key, service_date_from_millis, ResourceType, CACHE_KEY_PREFIX,
};
use super::traits::{LocalStore, MetadataFetcher};

/// Source of "now" in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
  Arc::new(|| Utc::now().timestamp_millis())
}

/// Cache manager that owns key derivation, entry reads/writes and staleness
/// checks against the remote watermark.
///
/// Writing is best-effort: store and encoding failures are logged and never
/// reach the caller.
pub struct CacheManager<S: LocalStore, M: MetadataFetcher> {
  storage: Arc<S>,
  metadata: Arc<M>,
  clock: Clock,
}

impl<S: LocalStore, M: MetadataFetcher> CacheManager<S, M> {
  /// Create a new cache manager over the given store and watermark source.
  pub fn new(storage: S, metadata: M) -> Self {
    Self {
      storage: Arc::new(storage),
      metadata: Arc::new(metadata),
      clock: system_clock(),
    }
  }

  /// Replace the clock used for `cachedAt` and for "today".
  pub fn with_clock(mut self, clock: Clock) -> Self {
    self.clock = clock;
    self
  }

  /// The underlying store.
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Today's date in the service timezone, according to the clock.
  pub fn today(&self) -> String {
    service_date_from_millis((self.clock)())
  }

  pub fn generate_cache_key(&self, resource: ResourceType, date: &str) -> String {
    generate_cache_key(resource, date)
  }

  /// Write a fresh entry for (type, date), replacing any previous one.
  pub fn set_cache<T: Serialize>(&self, resource: ResourceType, date: &str, data: &T) {
    self.write_entry(resource, date, &CacheEntry::new(data, (self.clock)()));
  }

  /// Put back an entry exactly as it was read, keeping its `cachedAt`.
  ///
  /// Used to keep a stale copy available while offline; the next online
  /// validation still sees it as stale.
  pub fn restore_entry<T: Serialize>(&self, resource: ResourceType, date: &str, entry: &CacheEntry<T>) {
    self.write_entry(resource, date, entry);
  }

  fn write_entry<T: Serialize>(&self, resource: ResourceType, date: &str, entry: &CacheEntry<T>) {
    let key = generate_cache_key(resource, date);
    let result = entry
      .encode()
      .and_then(|raw| self.storage.set(&key, &raw));

    match result {
      Ok(()) => debug!(key = %key, cached_at = entry.cached_at, "Cache entry written"),
      Err(e) => warn!(key = %key, error = %e, "Failed to write cache entry"),
    }
  }

  /// Read an entry, treating unreadable or undecodable values as missing.
  pub fn get_cache_entry<T: DeserializeOwned>(
    &self,
    resource: ResourceType,
    date: &str,
  ) -> Option<CacheEntry<T>> {
    match self.read_entry(resource, date) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(resource = %resource, date, error = %e, "Failed to read cache entry");
        None
      }
    }
  }

  /// Read an entry. Store errors are returned; decode errors count as missing.
  fn read_entry<T: DeserializeOwned>(
    &self,
    resource: ResourceType,
    date: &str,
  ) -> Result<Option<CacheEntry<T>>> {
    let key = generate_cache_key(resource, date);
    let Some(raw) = self.storage.get(&key)? else {
      return Ok(None);
    };

    match CacheEntry::decode(&raw) {
      Ok(entry) => Ok(Some(entry)),
      Err(e) => {
        warn!(key = %key, error = %e, "Discarding malformed cache entry");
        Ok(None)
      }
    }
  }

  /// Reconcile the local entry for (type, date) against the remote watermark.
  ///
  /// 1. No entry: `Missing`.
  /// 2. Watermark unavailable: `Fresh`, whatever the entry's age.
  /// 3. Watermark strictly newer than `cachedAt`: the entry is removed and
  ///    returned as `Stale`.
  /// 4. Otherwise `Fresh`. Equal timestamps are not stale.
  ///
  /// Only a failing store read is returned as an error.
  pub async fn validate<T: DeserializeOwned>(
    &self,
    resource: ResourceType,
    date: &str,
  ) -> Result<Validation<T>> {
    let Some(entry) = self.read_entry::<T>(resource, date)? else {
      debug!(resource = %resource, date, "Cache miss");
      return Ok(Validation::Missing);
    };

    let Some(metadata) = self.metadata.fetch_metadata().await else {
      debug!(resource = %resource, date, "Watermark unavailable, trusting cached entry");
      return Ok(Validation::Fresh(entry));
    };

    let watermark = metadata.last_updated(resource);
    if watermark > entry.cached_at {
      info!(
        resource = %resource,
        date,
        cached_at = entry.cached_at,
        watermark,
        "Cached entry is stale, removing"
      );
      self.remove_cache(resource, date);
      return Ok(Validation::Stale(entry));
    }

    debug!(resource = %resource, date, "Cache hit");
    Ok(Validation::Fresh(entry))
  }

  /// Validated read in its flat form.
  ///
  /// Stale entries are removed and reported as `{data: None, is_valid: false}`.
  pub async fn get_validated_cache<T: DeserializeOwned>(
    &self,
    resource: ResourceType,
    date: &str,
  ) -> Result<CacheValidationResult<T>> {
    Ok(self.validate(resource, date).await?.into())
  }

  pub fn remove_cache(&self, resource: ResourceType, date: &str) {
    let key = generate_cache_key(resource, date);
    if let Err(e) = self.storage.remove(&key) {
      warn!(key = %key, error = %e, "Failed to remove cache entry");
    }
  }

  pub fn has_cache_entry(&self, resource: ResourceType, date: &str) -> bool {
    let key = generate_cache_key(resource, date);
    match self.storage.get(&key) {
      Ok(value) => value.is_some(),
      Err(e) => {
        warn!(key = %key, error = %e, "Failed to check cache entry");
        false
      }
    }
  }

  /// Remove every cache entry whose date is not today. Returns how many keys
  /// were removed.
  pub fn clear_old_cache(&self) -> usize {
    let today = self.today();
    self.sweep(|key| match parse_cache_key(key) {
      Some((_, date)) => date != today,
      // Prefixed but unparseable keys can never be read back
      None => key.starts_with(CACHE_KEY_PREFIX),
    })
  }

  /// Remove every cache entry. Keys outside the cache prefix are kept.
  pub fn clear_all_cache(&self) -> usize {
    self.sweep(|key| key.starts_with(CACHE_KEY_PREFIX))
  }

  fn sweep(&self, should_remove: impl Fn(&str) -> bool) -> usize {
    let keys = match self.storage.list_keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Failed to list cache keys");
        return 0;
      }
    };

    let doomed: Vec<String> = keys.into_iter().filter(|k| should_remove(k)).collect();
    if doomed.is_empty() {
      return 0;
    }

    match self.storage.remove_many(&doomed) {
      Ok(()) => {
        info!(removed = doomed.len(), "Cleared cache entries");
        doomed.len()
      }
      Err(e) => {
        warn!(error = %e, "Failed to clear cache entries");
        0
      }
    }
  }
}

impl<S: LocalStore, M: MetadataFetcher> Clone for CacheManager<S, M> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      metadata: Arc::clone(&self.metadata),
      clock: Arc::clone(&self.clock),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::traits::BatchMetadata;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

  const DAY: &str = "2026-01-14";

  type MetaFn = Box<dyn Fn() -> std::future::Ready<Option<BatchMetadata>> + Send + Sync>;

  fn watermark(news: i64, terms: i64) -> MetaFn {
    Box::new(move || {
      std::future::ready(Some(BatchMetadata {
        news_last_updated: news,
        terms_last_updated: terms,
      }))
    })
  }

  fn no_metadata() -> MetaFn {
    Box::new(|| std::future::ready(None))
  }

  fn fixed_clock(now: i64) -> Clock {
    Arc::new(move || now)
  }

  fn manager(meta: MetaFn, now: i64) -> CacheManager<MemoryStorage, MetaFn> {
    CacheManager::new(MemoryStorage::new(), meta).with_clock(fixed_clock(now))
  }

  /// Store whose writes and reads can be made to fail.
  #[derive(Default)]
  struct FlakyStorage {
    inner: MemoryStorage,
    fail_reads: bool,
    fail_writes: bool,
  }

  impl LocalStore for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
      if self.fail_reads {
        return Err(eyre!("disk I/O error"));
      }
      self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
      if self.fail_writes {
        return Err(eyre!("quota exceeded"));
      }
      self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
      self.inner.remove(key)
    }

    fn list_keys(&self) -> Result<Vec<String>> {
      self.inner.list_keys()
    }

    fn remove_many(&self, keys: &[String]) -> Result<()> {
      self.inner.remove_many(keys)
    }
  }

  #[test]
  fn test_set_then_get_entry() {
    let cache = manager(no_metadata(), 1000);
    cache.set_cache(ResourceType::News, DAY, &vec!["headline"]);

    let entry: CacheEntry<Vec<String>> = cache.get_cache_entry(ResourceType::News, DAY).unwrap();
    assert_eq!(entry.data, vec!["headline"]);
    assert_eq!(entry.cached_at, 1000);
    assert!(cache.has_cache_entry(ResourceType::News, DAY));
    assert!(!cache.has_cache_entry(ResourceType::Terms, DAY));
  }

  #[test]
  fn test_rewrite_replaces_entry_with_new_timestamp() {
    let now = Arc::new(AtomicI64::new(1000));
    let clock_now = now.clone();
    let cache = CacheManager::new(MemoryStorage::new(), no_metadata())
      .with_clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));

    cache.set_cache(ResourceType::Terms, DAY, &1);
    now.store(2500, Ordering::SeqCst);
    cache.set_cache(ResourceType::Terms, DAY, &2);

    assert_eq!(cache.storage().list_keys().unwrap().len(), 1);
    let entry: CacheEntry<i32> = cache.get_cache_entry(ResourceType::Terms, DAY).unwrap();
    assert_eq!(entry.data, 2);
    assert_eq!(entry.cached_at, 2500);
  }

  #[test]
  fn test_malformed_entry_reads_as_missing() {
    let cache = manager(no_metadata(), 0);
    cache
      .storage()
      .set(&generate_cache_key(ResourceType::News, DAY), "{oops")
      .unwrap();

    assert!(cache
      .get_cache_entry::<Vec<String>>(ResourceType::News, DAY)
      .is_none());
  }

  #[test]
  fn test_write_failure_is_swallowed() {
    let storage = FlakyStorage {
      fail_writes: true,
      ..Default::default()
    };
    let cache = CacheManager::new(storage, no_metadata());

    cache.set_cache(ResourceType::News, DAY, &"data");
    assert!(!cache.has_cache_entry(ResourceType::News, DAY));
  }

  #[tokio::test]
  async fn test_validated_cache_missing() {
    let cache = manager(watermark(0, 0), 0);
    let result = cache
      .get_validated_cache::<String>(ResourceType::News, DAY)
      .await
      .unwrap();
    assert_eq!(result, CacheValidationResult::invalid());
  }

  #[tokio::test]
  async fn test_equal_watermark_is_not_stale() {
    let cache = manager(watermark(1000, 0), 1000);
    cache.set_cache(ResourceType::News, DAY, &"today");

    let result = cache
      .get_validated_cache::<String>(ResourceType::News, DAY)
      .await
      .unwrap();
    assert!(result.is_valid);
    assert_eq!(result.data.as_deref(), Some("today"));
  }

  #[tokio::test]
  async fn test_newer_watermark_by_one_millisecond_is_stale() {
    let cache = manager(watermark(1001, 0), 1000);
    cache.set_cache(ResourceType::News, DAY, &"today");

    let result = cache
      .get_validated_cache::<String>(ResourceType::News, DAY)
      .await
      .unwrap();
    assert!(!result.is_valid);
    assert!(result.data.is_none());
    assert!(!cache.has_cache_entry(ResourceType::News, DAY));
  }

  #[tokio::test]
  async fn test_stale_entry_is_removed_scenario() {
    let cache = manager(watermark(2000, 0), 1000);
    cache.set_cache(ResourceType::News, DAY, &"old");

    let result = cache
      .get_validated_cache::<String>(ResourceType::News, DAY)
      .await
      .unwrap();
    assert!(!result.is_valid);
    assert!(!cache.has_cache_entry(ResourceType::News, DAY));
  }

  #[tokio::test]
  async fn test_watermark_is_selected_per_type() {
    // News watermark is far newer, terms watermark is older than the entry
    let cache = manager(watermark(9999, 10), 1000);
    cache.set_cache(ResourceType::Terms, DAY, &"terms");

    let result = cache
      .get_validated_cache::<String>(ResourceType::Terms, DAY)
      .await
      .unwrap();
    assert!(result.is_valid);
  }

  #[tokio::test]
  async fn test_unavailable_metadata_trusts_any_entry() {
    let cache = manager(no_metadata(), 0);
    // cachedAt = 0 is older than any real watermark
    cache.set_cache(ResourceType::News, DAY, &"ancient");

    let result = cache
      .get_validated_cache::<String>(ResourceType::News, DAY)
      .await
      .unwrap();
    assert!(result.is_valid);
    assert_eq!(result.data.as_deref(), Some("ancient"));
  }

  #[tokio::test]
  async fn test_metadata_not_fetched_without_entry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let meta = move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(None::<BatchMetadata>)
    };
    let cache = CacheManager::new(MemoryStorage::new(), meta);

    let validation = cache.validate::<String>(ResourceType::News, DAY).await.unwrap();
    assert_eq!(validation, Validation::Missing);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_validate_keeps_stale_payload() {
    let cache = manager(watermark(5000, 0), 1000);
    cache.set_cache(ResourceType::News, DAY, &"old");

    let validation = cache.validate::<String>(ResourceType::News, DAY).await.unwrap();
    assert_eq!(validation, Validation::Stale(CacheEntry::new("old".to_string(), 1000)));
  }

  #[tokio::test]
  async fn test_restored_entry_keeps_timestamp() {
    let cache = manager(watermark(5000, 0), 9000);
    let entry = CacheEntry::new("old".to_string(), 1000);
    cache.restore_entry(ResourceType::News, DAY, &entry);

    let read: CacheEntry<String> = cache.get_cache_entry(ResourceType::News, DAY).unwrap();
    assert_eq!(read, entry);

    // Still stale against the same watermark
    let validation = cache.validate::<String>(ResourceType::News, DAY).await.unwrap();
    assert!(matches!(validation, Validation::Stale(_)));
  }

  #[tokio::test]
  async fn test_store_read_error_propagates_from_validation() {
    let storage = FlakyStorage {
      fail_reads: true,
      ..Default::default()
    };
    let cache = CacheManager::new(storage, no_metadata());

    assert!(cache
      .get_validated_cache::<String>(ResourceType::News, DAY)
      .await
      .is_err());
    assert!(cache
      .get_cache_entry::<String>(ResourceType::News, DAY)
      .is_none());
    assert!(!cache.has_cache_entry(ResourceType::News, DAY));
  }

  #[test]
  fn test_clear_old_cache_keeps_today_only() {
    // 2026-01-14 03:00 UTC is 2026-01-14 12:00 at UTC+9
    let now = chrono::DateTime::parse_from_rfc3339("2026-01-14T03:00:00Z")
      .unwrap()
      .timestamp_millis();
    let cache = manager(no_metadata(), now);
    cache.set_cache(ResourceType::News, "2026-01-13", &1);
    cache.set_cache(ResourceType::Terms, "2026-01-12", &1);
    cache.set_cache(ResourceType::News, "2026-01-14", &1);
    cache.set_cache(ResourceType::Terms, "2026-01-14", &1);
    cache.storage().set("settings_locale", "ko").unwrap();

    assert_eq!(cache.clear_old_cache(), 2);
    assert_eq!(
      cache.storage().list_keys().unwrap(),
      vec![
        "cache_news_2026-01-14",
        "cache_terms_2026-01-14",
        "settings_locale"
      ]
    );
  }

  #[test]
  fn test_clear_all_cache_leaves_foreign_keys() {
    let cache = manager(no_metadata(), 0);
    cache.set_cache(ResourceType::News, DAY, &1);
    cache.set_cache(ResourceType::Terms, DAY, &1);
    cache.storage().set("settings_locale", "ko").unwrap();

    assert_eq!(cache.clear_all_cache(), 2);
    assert_eq!(cache.storage().list_keys().unwrap(), vec!["settings_locale"]);
    assert_eq!(cache.clear_all_cache(), 0);
  }

  #[test]
  fn test_remove_cache() {
    let cache = manager(no_metadata(), 0);
    cache.set_cache(ResourceType::News, DAY, &1);
    cache.remove_cache(ResourceType::News, DAY);
    assert!(!cache.has_cache_entry(ResourceType::News, DAY));
  }
}
