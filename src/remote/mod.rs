//! Remote side of the cache: fetcher capabilities, the REST adapter and
//! error classification.

mod client;
mod error;

pub use client::{RestClient, RestMetadataFetcher, RestResourceFetcher};
pub use error::{classify_error, AppError, ErrorCode, Locale, RemoteError};

use std::future::Future;

use color_eyre::Result;

/// What a remote fetch produced for one date.
///
/// `exists == false` means the day's content has not been published yet,
/// which is not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
  pub data: Option<T>,
  pub exists: bool,
}

impl<T> Fetched<T> {
  pub fn found(data: T) -> Self {
    Self {
      data: Some(data),
      exists: true,
    }
  }

  pub fn not_found() -> Self {
    Self {
      data: None,
      exists: false,
    }
  }
}

/// Source of a single day's resource.
///
/// Transport, auth and server failures are errors; "not published yet" is
/// `Ok(Fetched::not_found())`.
pub trait RemoteFetcher<T>: Send + Sync {
  fn fetch(&self, date: &str) -> impl Future<Output = Result<Fetched<T>>> + Send;
}

impl<T, F, Fut> RemoteFetcher<T> for F
where
  F: Fn(&str) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Fetched<T>>> + Send,
{
  fn fetch(&self, date: &str) -> impl Future<Output = Result<Fetched<T>>> + Send {
    self(date)
  }
}
