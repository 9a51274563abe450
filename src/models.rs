//! Daily content payloads as stored by the batch pipeline.

use serde::{Deserialize, Serialize};

use crate::cache::{DailyResource, ResourceType};

/// One day's news digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyNews {
  pub date: String,
  #[serde(default)]
  pub articles: Vec<NewsArticle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
  pub title: String,
  pub summary: String,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub source: Option<String>,
  #[serde(default)]
  pub published_at: Option<String>,
}

/// One day's set of explained terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTerms {
  pub date: String,
  #[serde(default)]
  pub terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
  pub term: String,
  pub definition: String,
  #[serde(default)]
  pub example: Option<String>,
  #[serde(default)]
  pub category: Option<String>,
}

impl DailyResource for DailyNews {
  fn resource_type() -> ResourceType {
    ResourceType::News
  }
}

impl DailyResource for DailyTerms {
  fn resource_type() -> ResourceType {
    ResourceType::Terms
  }
}
