//! REST adapters for the daily content tables.
//!
//! The backend exposes PostgREST-style endpoints:
//! `GET {base}/rest/v1/{table}?date=eq.{date}&select=*&limit=1` returns a JSON
//! array that is empty when the day has not been published yet, and
//! `batch_metadata` holds one row of last-updated timestamps.

use std::marker::PhantomData;
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Report, Result};
use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{BatchMetadata, DailyResource, MetadataFetcher, ResourceType};
use crate::config::RemoteConfig;

use super::error::RemoteError;
use super::{Fetched, RemoteFetcher};

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const METADATA_TABLE: &str = "batch_metadata";

/// HTTP client for the content backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestClient {
  client: Client,
  base_url: Url,
  api_key: String,
}

#[derive(Debug, Deserialize)]
struct MetadataRow {
  news_last_updated: Option<DateTime<Utc>>,
  terms_last_updated: Option<DateTime<Utc>>,
}

impl MetadataRow {
  fn into_metadata(self) -> Option<BatchMetadata> {
    Some(BatchMetadata {
      news_last_updated: self.news_last_updated?.timestamp_millis(),
      terms_last_updated: self.terms_last_updated?.timestamp_millis(),
    })
  }
}

impl RestClient {
  pub fn new(config: &RemoteConfig, api_key: String) -> Result<Self> {
    let mut base_url =
      Url::parse(&config.url).map_err(|e| eyre!("Invalid remote url {}: {}", config.url, e))?;

    // Table paths are joined relative to the base
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      api_key,
    })
  }

  fn table_url(&self, table: &str, filters: &[(&str, &str)]) -> Result<Url> {
    let mut url = self
      .base_url
      .join(&format!("rest/v1/{}", table))
      .map_err(|e| eyre!("Failed to build url for {}: {}", table, e))?;

    if !filters.is_empty() {
      url.query_pairs_mut().extend_pairs(filters.iter().copied());
    }
    Ok(url)
  }

  /// GET a table and decode the JSON rows, retrying while rate limited.
  async fn get_rows<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
    let mut retries = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
      let response = self
        .client
        .get(url.clone())
        .header("apikey", self.api_key.as_str())
        .bearer_auth(&self.api_key)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| Report::new(e).wrap_err(format!("Request to {} failed", url.path())))?;

      if response.status() == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RATE_LIMIT_RETRIES {
        retries += 1;
        warn!(path = url.path(), retries, backoff_ms, "Rate limited, backing off");
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms *= 2;
        continue;
      }

      let response = Self::check_response(response).await?;
      return response
        .json()
        .await
        .map_err(|e| Report::new(RemoteError::InvalidResponse(e.to_string())));
    }
  }

  /// Check if response is successful, returning a typed error with body if not.
  async fn check_response(response: Response) -> Result<Response> {
    if response.status().is_success() {
      Ok(response)
    } else {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      Err(RemoteError::from_status(status.as_u16(), &body).into())
    }
  }

  /// Fetch the row for one date from a daily content table.
  pub async fn fetch_daily<T: DeserializeOwned>(&self, table: &str, date: &str) -> Result<Fetched<T>> {
    let filter = format!("eq.{}", date);
    let url = self.table_url(
      table,
      &[("date", filter.as_str()), ("select", "*"), ("limit", "1")],
    )?;

    debug!(table, date, "Fetching daily content");
    let rows: Vec<T> = self.get_rows(url).await?;

    Ok(match rows.into_iter().next() {
      Some(row) => Fetched::found(row),
      None => Fetched::not_found(),
    })
  }

  /// Fetch the last-updated watermarks. A missing row or a NULL column means
  /// no watermark is known.
  pub async fn fetch_batch_metadata(&self) -> Result<Option<BatchMetadata>> {
    let url = self.table_url(
      METADATA_TABLE,
      &[
        ("select", "news_last_updated,terms_last_updated"),
        ("limit", "1"),
      ],
    )?;

    let rows: Vec<MetadataRow> = self.get_rows(url).await?;
    Ok(rows.into_iter().next().and_then(MetadataRow::into_metadata))
  }
}

/// Table holding each resource type's daily rows.
pub fn table_for(resource: ResourceType) -> &'static str {
  match resource {
    ResourceType::News => "daily_news",
    ResourceType::Terms => "daily_terms",
  }
}

/// [`RemoteFetcher`] for one resource type backed by [`RestClient`].
pub struct RestResourceFetcher<T> {
  client: RestClient,
  _marker: PhantomData<fn() -> T>,
}

impl<T> RestResourceFetcher<T> {
  pub fn new(client: RestClient) -> Self {
    Self {
      client,
      _marker: PhantomData,
    }
  }
}

impl<T: DailyResource> RemoteFetcher<T> for RestResourceFetcher<T> {
  async fn fetch(&self, date: &str) -> Result<Fetched<T>> {
    self.client.fetch_daily(table_for(T::resource_type()), date).await
  }
}

/// [`MetadataFetcher`] backed by [`RestClient`]; every failure becomes `None`.
pub struct RestMetadataFetcher {
  client: RestClient,
}

impl RestMetadataFetcher {
  pub fn new(client: RestClient) -> Self {
    Self { client }
  }
}

impl MetadataFetcher for RestMetadataFetcher {
  async fn fetch_metadata(&self) -> Option<BatchMetadata> {
    match self.client.fetch_batch_metadata().await {
      Ok(metadata) => metadata,
      Err(e) => {
        warn!(error = %e, "Failed to fetch batch metadata");
        None
      }
    }
  }
}
