//! Repository that answers "give me today's resource".
//!
//! Preference order: valid cache, then (offline) any cached copy, then the
//! remote store. Remote failures are returned as a structured
//! [`RepositoryResult`], never as an `Err`.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, DailyResource, LocalStore, MetadataFetcher, Validation};
use crate::models::{DailyNews, DailyTerms};
use crate::network::NetworkStateTracker;
use crate::remote::{classify_error, AppError, ErrorCode, Locale, RemoteFetcher};

/// Indicates where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
  /// Local cache, fresh or (offline) stale
  Cache,
  /// Remote store
  Remote,
}

/// Tagged outcome of [`ResourceRepository::get_today`].
///
/// `success` with `data == None` and `source == Remote` means the day's
/// content has not been published yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryResult<T> {
  pub success: bool,
  pub data: Option<T>,
  pub source: DataSource,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<AppError>,
}

impl<T> RepositoryResult<T> {
  fn success(data: Option<T>, source: DataSource) -> Self {
    Self {
      success: true,
      data,
      source,
      error: None,
    }
  }

  fn failure(source: DataSource, error: AppError) -> Self {
    Self {
      success: false,
      data: None,
      source,
      error: Some(error),
    }
  }
}

/// Cache-first access to one kind of daily resource.
pub struct ResourceRepository<T, S: LocalStore, M: MetadataFetcher, R> {
  cache: CacheManager<S, M>,
  network: Arc<NetworkStateTracker>,
  remote: R,
  locale: Locale,
  _resource: PhantomData<fn() -> T>,
}

pub type NewsRepository<S, M, R> = ResourceRepository<DailyNews, S, M, R>;
pub type TermsRepository<S, M, R> = ResourceRepository<DailyTerms, S, M, R>;

impl<T, S, M, R> ResourceRepository<T, S, M, R>
where
  T: DailyResource,
  S: LocalStore,
  M: MetadataFetcher,
  R: RemoteFetcher<T>,
{
  pub fn new(cache: CacheManager<S, M>, network: Arc<NetworkStateTracker>, remote: R) -> Self {
    Self {
      cache,
      network,
      remote,
      locale: Locale::default(),
      _resource: PhantomData,
    }
  }

  /// Set the language of error messages.
  pub fn with_locale(mut self, locale: Locale) -> Self {
    self.locale = locale;
    self
  }

  pub fn cache(&self) -> &CacheManager<S, M> {
    &self.cache
  }

  /// Today's resource, where "today" is the service-timezone date.
  pub async fn get_today(&self) -> RepositoryResult<T> {
    let today = self.cache.today();
    self.get_for_date(&today).await
  }

  /// Same decision procedure as [`get_today`](Self::get_today) for an explicit
  /// date.
  pub async fn get_for_date(&self, date: &str) -> RepositoryResult<T> {
    let resource = T::resource_type();

    // A broken cache must not block remote reads
    let validation = match self.cache.validate::<T>(resource, date).await {
      Ok(validation) => validation,
      Err(e) => {
        warn!(resource = %resource, date, error = %e, "Cache validation failed, ignoring cache");
        Validation::Missing
      }
    };

    let stale = match validation {
      Validation::Fresh(entry) => {
        debug!(resource = %resource, date, "Serving valid cached copy");
        return RepositoryResult::success(Some(entry.data), DataSource::Cache);
      }
      Validation::Stale(entry) => Some(entry),
      Validation::Missing => None,
    };

    if self.network.is_offline() {
      return match stale {
        Some(entry) => {
          // Validation dropped the copy; keep it until we are back online
          self.cache.restore_entry(resource, date, &entry);
          info!(resource = %resource, date, "Offline, serving stale cached copy");
          RepositoryResult::success(Some(entry.data), DataSource::Cache)
        }
        None => {
          info!(resource = %resource, date, "Offline with nothing cached");
          RepositoryResult::failure(DataSource::Cache, AppError::new(ErrorCode::Offline, self.locale))
        }
      };
    }

    info!(resource = %resource, date, "Fetching from remote");
    match self.remote.fetch(date).await {
      Ok(fetched) => {
        self.network.update_from_request_outcome(true, None);
        match (fetched.exists, fetched.data) {
          (true, Some(data)) => {
            self.cache.set_cache(resource, date, &data);
            RepositoryResult::success(Some(data), DataSource::Remote)
          }
          _ => {
            info!(resource = %resource, date, "Nothing published yet");
            RepositoryResult::success(None, DataSource::Remote)
          }
        }
      }
      Err(e) => {
        let message = format!("{:#}", e);
        self
          .network
          .update_from_request_outcome(false, Some(&message));

        let code = classify_error(&e);
        warn!(resource = %resource, date, ?code, error = %message, "Remote fetch failed");
        RepositoryResult::failure(DataSource::Remote, AppError::new(code, self.locale))
      }
    }
  }
}
