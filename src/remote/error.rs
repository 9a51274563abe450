//! Remote error taxonomy and the messages shown for each code.

use std::io;

use color_eyre::Report;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by remote adapters with a known cause.
#[derive(Error, Debug)]
pub enum RemoteError {
  #[error("Connection failed: {0}")]
  Connection(String),

  #[error("Request timeout")]
  Timeout,

  #[error("Resource not found: {0}")]
  NotFound(String),

  #[error("Permission denied: {0}")]
  PermissionDenied(String),

  #[error("Service unavailable: {0}")]
  Unavailable(String),

  #[error("Request cancelled")]
  Cancelled,

  #[error("Unexpected response: {0}")]
  InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RemoteError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      body.to_string()
    } else {
      let cut = (0..=MAX_ERROR_BODY_LENGTH)
        .rev()
        .find(|&i| body.is_char_boundary(i))
        .unwrap_or(0);
      format!(
        "{}... (truncated, {} total bytes)",
        &body[..cut],
        body.len()
      )
    }
  }

  pub fn from_status(status: u16, body: &str) -> Self {
    let truncated = Self::truncate_body(body);
    match status {
      401 | 403 => RemoteError::PermissionDenied(truncated),
      404 => RemoteError::NotFound(truncated),
      408 => RemoteError::Timeout,
      429 | 500..=599 => RemoteError::Unavailable(truncated),
      _ => RemoteError::InvalidResponse(format!("Status {}: {}", status, truncated)),
    }
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      RemoteError::Connection(_) => ErrorCode::ConnectionFailed,
      RemoteError::Timeout => ErrorCode::Timeout,
      RemoteError::NotFound(_) => ErrorCode::NotFound,
      RemoteError::PermissionDenied(_) => ErrorCode::PermissionDenied,
      RemoteError::Unavailable(_) => ErrorCode::Unavailable,
      RemoteError::Cancelled => ErrorCode::Cancelled,
      RemoteError::InvalidResponse(_) => ErrorCode::Unknown,
    }
  }
}

/// Error codes surfaced to callers of the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  ConnectionFailed,
  Timeout,
  NotFound,
  PermissionDenied,
  Unavailable,
  Cancelled,
  Offline,
  Unknown,
}

impl ErrorCode {
  /// Whether retrying the same call can reasonably succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      ErrorCode::ConnectionFailed | ErrorCode::Timeout | ErrorCode::Unavailable | ErrorCode::Offline
    )
  }

  pub fn message(&self, locale: Locale) -> &'static str {
    match locale {
      Locale::En => match self {
        ErrorCode::ConnectionFailed => "Could not connect to the server. Please check your network.",
        ErrorCode::Timeout => "The request took too long. Please try again.",
        ErrorCode::NotFound => "The requested content could not be found.",
        ErrorCode::PermissionDenied => "You do not have permission to view this content.",
        ErrorCode::Unavailable => "The service is temporarily unavailable. Please try again later.",
        ErrorCode::Cancelled => "The request was cancelled.",
        ErrorCode::Offline => "You are offline and no saved content is available.",
        ErrorCode::Unknown => "Something went wrong. Please try again later.",
      },
      Locale::Ko => match self {
        ErrorCode::ConnectionFailed => "서버에 연결할 수 없습니다. 네트워크 상태를 확인해 주세요.",
        ErrorCode::Timeout => "요청 시간이 초과되었습니다. 다시 시도해 주세요.",
        ErrorCode::NotFound => "요청한 콘텐츠를 찾을 수 없습니다.",
        ErrorCode::PermissionDenied => "이 콘텐츠를 볼 수 있는 권한이 없습니다.",
        ErrorCode::Unavailable => "일시적으로 서비스를 이용할 수 없습니다. 잠시 후 다시 시도해 주세요.",
        ErrorCode::Cancelled => "요청이 취소되었습니다.",
        ErrorCode::Offline => "오프라인 상태이며 저장된 콘텐츠가 없습니다.",
        ErrorCode::Unknown => "알 수 없는 오류가 발생했습니다. 잠시 후 다시 시도해 주세요.",
      },
    }
  }
}

/// Language for user-facing error messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
  #[default]
  En,
  Ko,
}

/// Structured error handed to UI code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppError {
  pub code: ErrorCode,
  pub message: String,
  pub retryable: bool,
}

impl AppError {
  pub fn new(code: ErrorCode, locale: Locale) -> Self {
    Self {
      code,
      message: code.message(locale).to_string(),
      retryable: code.is_retryable(),
    }
  }
}

/// Map a remote failure onto an [`ErrorCode`].
///
/// The error chain is inspected for typed causes first; message matching is
/// the last resort and reads every layer, innermost first.
pub fn classify_error(error: &Report) -> ErrorCode {
  for cause in error.chain() {
    if let Some(e) = cause.downcast_ref::<RemoteError>() {
      return e.code();
    }
    if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
      if let Some(code) = classify_reqwest(e) {
        return code;
      }
    }
    if let Some(e) = cause.downcast_ref::<io::Error>() {
      if let Some(code) = classify_io(e) {
        return code;
      }
    }
    if cause.is::<tokio::time::error::Elapsed>() {
      return ErrorCode::Timeout;
    }
  }

  let causes: Vec<_> = error.chain().collect();
  causes
    .iter()
    .rev()
    .map(|cause| classify_message(&cause.to_string()))
    .find(|code| *code != ErrorCode::Unknown)
    .unwrap_or(ErrorCode::Unknown)
}

fn classify_reqwest(error: &reqwest::Error) -> Option<ErrorCode> {
  if error.is_timeout() {
    return Some(ErrorCode::Timeout);
  }
  if error.is_connect() {
    return Some(ErrorCode::ConnectionFailed);
  }
  if let Some(status) = error.status() {
    return Some(RemoteError::from_status(status.as_u16(), "").code());
  }
  if error.is_request() {
    return Some(ErrorCode::ConnectionFailed);
  }
  None
}

fn classify_io(error: &io::Error) -> Option<ErrorCode> {
  match error.kind() {
    io::ErrorKind::TimedOut => Some(ErrorCode::Timeout),
    io::ErrorKind::ConnectionRefused
    | io::ErrorKind::ConnectionReset
    | io::ErrorKind::ConnectionAborted
    | io::ErrorKind::NotConnected
    | io::ErrorKind::BrokenPipe => Some(ErrorCode::ConnectionFailed),
    io::ErrorKind::PermissionDenied => Some(ErrorCode::PermissionDenied),
    io::ErrorKind::NotFound => Some(ErrorCode::NotFound),
    io::ErrorKind::Interrupted => Some(ErrorCode::Cancelled),
    _ => None,
  }
}

fn classify_message(message: &str) -> ErrorCode {
  let message = message.to_lowercase();
  let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

  if has(&["timeout", "timed out"]) {
    ErrorCode::Timeout
  } else if has(&["cancel", "abort"]) {
    ErrorCode::Cancelled
  } else if has(&["permission", "denied", "unauthorized", "forbidden", "jwt"]) {
    ErrorCode::PermissionDenied
  } else if has(&["unavailable", "service down", "too many requests"]) {
    ErrorCode::Unavailable
  } else if has(&["network", "connection", "fetch", "dns"]) {
    ErrorCode::ConnectionFailed
  } else if has(&["not found", "does not exist"]) {
    ErrorCode::NotFound
  } else {
    ErrorCode::Unknown
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::{eyre, WrapErr};

  #[test]
  fn test_from_status() {
    assert_eq!(RemoteError::from_status(401, "").code(), ErrorCode::PermissionDenied);
    assert_eq!(RemoteError::from_status(403, "").code(), ErrorCode::PermissionDenied);
    assert_eq!(RemoteError::from_status(404, "").code(), ErrorCode::NotFound);
    assert_eq!(RemoteError::from_status(408, "").code(), ErrorCode::Timeout);
    assert_eq!(RemoteError::from_status(503, "").code(), ErrorCode::Unavailable);
    assert_eq!(RemoteError::from_status(418, "").code(), ErrorCode::Unknown);
  }

  #[test]
  fn test_truncate_body() {
    let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
    let message = RemoteError::from_status(500, &body).to_string();
    assert!(message.contains("truncated"));
    assert!(message.len() < body.len() + 50);

    // Multi-byte characters straddling the limit are not split
    let korean = "가".repeat(MAX_ERROR_BODY_LENGTH);
    assert!(RemoteError::truncate_body(&korean).contains("truncated"));
  }

  #[test]
  fn test_retryability_table() {
    let retryable: Vec<ErrorCode> = [
      ErrorCode::ConnectionFailed,
      ErrorCode::Timeout,
      ErrorCode::NotFound,
      ErrorCode::PermissionDenied,
      ErrorCode::Unavailable,
      ErrorCode::Cancelled,
      ErrorCode::Offline,
      ErrorCode::Unknown,
    ]
    .into_iter()
    .filter(ErrorCode::is_retryable)
    .collect();

    assert_eq!(
      retryable,
      vec![
        ErrorCode::ConnectionFailed,
        ErrorCode::Timeout,
        ErrorCode::Unavailable,
        ErrorCode::Offline
      ]
    );
  }

  #[test]
  fn test_classify_typed_error_through_context() {
    let report = Report::new(RemoteError::PermissionDenied("rls".into()))
      .wrap_err("Failed to fetch daily_news");
    // The typed cause wins over the "fetch" in the outer message
    assert_eq!(classify_error(&report), ErrorCode::PermissionDenied);
  }

  #[test]
  fn test_classify_io_error() {
    let report = Report::new(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
    assert_eq!(classify_error(&report), ErrorCode::ConnectionFailed);

    let report = Report::new(io::Error::new(io::ErrorKind::TimedOut, "slow"));
    assert_eq!(classify_error(&report), ErrorCode::Timeout);
  }

  #[tokio::test]
  async fn test_classify_elapsed() {
    let elapsed = tokio::time::timeout(
      std::time::Duration::from_millis(1),
      std::future::pending::<()>(),
    )
    .await
    .unwrap_err();
    assert_eq!(classify_error(&Report::new(elapsed)), ErrorCode::Timeout);
  }

  #[test]
  fn test_classify_by_message() {
    assert_eq!(classify_error(&eyre!("TypeError: Failed to fetch")), ErrorCode::ConnectionFailed);
    assert_eq!(classify_error(&eyre!("Network request failed")), ErrorCode::ConnectionFailed);
    assert_eq!(classify_error(&eyre!("request timed out")), ErrorCode::Timeout);
    assert_eq!(classify_error(&eyre!("JWT expired")), ErrorCode::PermissionDenied);
    assert_eq!(classify_error(&eyre!("AbortError: aborted")), ErrorCode::Cancelled);
    assert_eq!(
      classify_error(&eyre!("relation \"daily_news\" does not exist")),
      ErrorCode::NotFound
    );
    assert_eq!(classify_error(&eyre!("boom")), ErrorCode::Unknown);
  }

  #[test]
  fn test_classify_message_under_context() {
    let report = eyre!("network is unreachable").wrap_err("Failed to load daily news");
    assert_eq!(classify_error(&report), ErrorCode::ConnectionFailed);
    assert!(AppError::new(classify_error(&report), Locale::En).retryable);

    // The inner cause decides even when the outer context matches too
    let report = eyre!("connect timed out").wrap_err("Failed to fetch daily_news");
    assert_eq!(classify_error(&report), ErrorCode::Timeout);

    let report = eyre!("boom").wrap_err("while loading");
    assert_eq!(classify_error(&report), ErrorCode::Unknown);
  }

  #[test]
  fn test_app_error_serializes_for_ui() {
    let error = AppError::new(ErrorCode::Offline, Locale::En);
    let value = serde_json::to_value(&error).unwrap();
    assert_eq!(value["code"], "OFFLINE");
    assert_eq!(value["retryable"], true);
    assert!(!value["message"].as_str().unwrap().is_empty());
  }

  #[test]
  fn test_every_code_has_messages() {
    for locale in [Locale::En, Locale::Ko] {
      assert!(!ErrorCode::Unknown.message(locale).is_empty());
      assert_ne!(
        ErrorCode::Offline.message(locale),
        ErrorCode::Timeout.message(locale)
      );
    }
  }
}
