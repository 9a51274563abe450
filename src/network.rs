//! Best-effort connectivity tracking.
//!
//! No platform connectivity API is consulted. The tracker starts out online
//! and changes state either when told to explicitly or when a remote call
//! fails in a way that looks like a connectivity problem.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tracing::{debug, info};

/// Error message fragments that indicate a connectivity failure.
const OFFLINE_ERROR_PATTERNS: [&str; 4] = ["network", "connection", "timeout", "fetch"];

const DEFAULT_CONNECTION_TYPE: &str = "unknown";
const OFFLINE_CONNECTION_TYPE: &str = "none";

/// Snapshot of the tracker's belief about connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
  pub is_connected: bool,
  pub connection_type: String,
}

impl Default for NetworkState {
  fn default() -> Self {
    Self {
      is_connected: true,
      connection_type: DEFAULT_CONNECTION_TYPE.to_string(),
    }
  }
}

type Listener = Arc<dyn Fn(&NetworkState) + Send + Sync>;

#[derive(Default)]
struct TrackerInner {
  state: NetworkState,
  listeners: Vec<(u64, Listener)>,
  next_id: u64,
}

/// Shared online/offline flag with change listeners.
///
/// Construct one per process (or per test) and hand it to every repository
/// as an `Arc`.
#[derive(Default)]
pub struct NetworkStateTracker {
  inner: Mutex<TrackerInner>,
}

impl NetworkStateTracker {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, TrackerInner> {
    // State is a plain value, a panicking listener cannot leave it half-written
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> NetworkState {
    self.lock().state.clone()
  }

  pub fn is_connected(&self) -> bool {
    self.lock().state.is_connected
  }

  pub fn is_offline(&self) -> bool {
    !self.is_connected()
  }

  /// Set the state. Listeners run only if `is_connected` actually changed.
  pub fn set_state(&self, is_connected: bool, connection_type: impl Into<String>) {
    let new_state = NetworkState {
      is_connected,
      connection_type: connection_type.into(),
    };

    let listeners: Vec<Listener> = {
      let mut inner = self.lock();
      let changed = inner.state.is_connected != is_connected;
      inner.state = new_state.clone();
      if !changed {
        return;
      }
      inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    };

    info!(
      is_connected,
      connection_type = %new_state.connection_type,
      "Network state changed"
    );

    // Called without the lock held so listeners may query the tracker
    for listener in listeners {
      listener(&new_state);
    }
  }

  /// Infer connectivity from the outcome of a remote call.
  ///
  /// A success always means online. A failure only means offline when the
  /// message looks like a connectivity problem; anything else (a validation
  /// error, say) leaves the state alone.
  pub fn update_from_request_outcome(&self, success: bool, error_message: Option<&str>) {
    if success {
      let connection_type = {
        let inner = self.lock();
        if inner.state.is_connected {
          inner.state.connection_type.clone()
        } else {
          DEFAULT_CONNECTION_TYPE.to_string()
        }
      };
      self.set_state(true, connection_type);
      return;
    }

    match error_message {
      Some(message) if is_connectivity_error(message) => {
        self.set_state(false, OFFLINE_CONNECTION_TYPE);
      }
      _ => debug!(?error_message, "Request failure does not indicate connectivity loss"),
    }
  }

  /// Register a listener, called with the new state on every online/offline
  /// transition.
  pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
  where
    F: Fn(&NetworkState) + Send + Sync + 'static,
  {
    let mut inner = self.lock();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.listeners.push((id, Arc::new(listener)));

    Subscription {
      id,
      tracker: Arc::downgrade(self),
    }
  }

  fn unsubscribe(&self, id: u64) {
    self.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
  }

  pub fn listener_count(&self) -> usize {
    self.lock().listeners.len()
  }

  /// Back to the initial online state with no listeners.
  pub fn reset(&self) {
    let mut inner = self.lock();
    inner.state = NetworkState::default();
    inner.listeners.clear();
  }
}

/// Handle returned by [`NetworkStateTracker::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
  id: u64,
  tracker: Weak<NetworkStateTracker>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    if let Some(tracker) = self.tracker.upgrade() {
      tracker.unsubscribe(self.id);
    }
  }
}

fn is_connectivity_error(message: &str) -> bool {
  let message = message.to_lowercase();
  OFFLINE_ERROR_PATTERNS
    .iter()
    .any(|pattern| message.contains(pattern))
}
