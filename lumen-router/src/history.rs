//! History/location collaborator
//!
//! The router never touches a browser API directly. All URL reads and history
//! writes go through the [`LocationManager`] trait, and URL changes initiated
//! by the host (back/forward buttons, manual edits) come back in through the
//! listener registered with [`LocationManager::start_listening`].
//!
//! [`MemoryLocationManager`] is the in-process implementation used by tests,
//! demos and non-browser hosts: a plain history stack with base-href handling
//! and listener dispatch on traversal.

use crate::instruction::NavigationTrigger;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// State key under which the router stores the navigation id in managed
/// history state, so traversal events can be correlated back to a navigation.
pub const NAV_ID_KEY: &str = "lumen:router:navId";

/// A URL change reported by the location collaborator.
#[derive(Debug, Clone)]
pub struct LocationChange {
    /// The new path (without base href)
    pub url: String,
    /// What produced the change
    pub trigger: NavigationTrigger,
    /// The history state stored with the entry, if any
    pub state: Option<serde_json::Value>,
}

/// Listener invoked by the location collaborator on host-initiated changes.
pub type LocationListener = Arc<dyn Fn(LocationChange) + Send + Sync>;

/// The history/location contract consumed by the router.
pub trait LocationManager: Send + Sync {
    /// Begin reporting host-initiated URL changes to `listener`.
    fn start_listening(&self, listener: LocationListener);
    /// Stop reporting URL changes.
    fn stop_listening(&self);
    /// The current path, without base href.
    fn get_path(&self) -> String;
    /// Push a new history entry.
    fn push_state(&self, state: serde_json::Value, title: &str, url: &str);
    /// Replace the current history entry.
    fn replace_state(&self, state: serde_json::Value, title: &str, url: &str);
    /// Prefix `path` with the configured base href.
    fn add_base_href(&self, path: &str) -> String;
    /// Strip the configured base href from `path`.
    fn remove_base_href(&self, path: &str) -> String;
    /// Whether the current location equals `path` (after base-href handling).
    fn current_path_equals(&self, path: &str) -> bool;
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Debug, Clone)]
struct HistoryEntry {
    url: String,
    title: String,
    state: serde_json::Value,
}

struct MemoryHistory {
    entries: Vec<HistoryEntry>,
    index: usize,
}

/// In-process [`LocationManager`] backed by a history stack.
///
/// Besides the trait surface, it exposes [`go`](Self::go) to simulate host
/// traversal (the equivalent of the browser back/forward buttons), which
/// dispatches to the registered listener with a `Popstate` trigger.
pub struct MemoryLocationManager {
    base_href: String,
    history: Mutex<MemoryHistory>,
    listener: Mutex<Option<LocationListener>>,
}

impl MemoryLocationManager {
    /// Create a manager with an empty base href, positioned at `/`.
    pub fn new() -> Arc<Self> {
        Self::with_base_href("")
    }

    /// Create a manager with the given base href.
    pub fn with_base_href(base_href: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            base_href: normalize_base(base_href.into()),
            history: Mutex::new(MemoryHistory {
                entries: vec![HistoryEntry {
                    url: String::new(),
                    title: String::new(),
                    state: serde_json::Value::Null,
                }],
                index: 0,
            }),
            listener: Mutex::new(None),
        })
    }

    /// Traverse the history stack by `delta` entries, like the browser
    /// back/forward buttons, and notify the listener.
    pub fn go(&self, delta: isize) {
        let change = {
            let mut history = self.history.lock();
            let target = history.index as isize + delta;
            if target < 0 || target as usize >= history.entries.len() {
                trace!(delta, "history traversal out of range, ignoring");
                return;
            }
            history.index = target as usize;
            let entry = &history.entries[history.index];
            LocationChange {
                url: entry.url.clone(),
                trigger: NavigationTrigger::Popstate,
                state: match &entry.state {
                    serde_json::Value::Null => None,
                    other => Some(other.clone()),
                },
            }
        };
        debug!(url = %change.url, "history traversal");
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(change);
        }
    }

    /// Number of entries currently on the stack.
    pub fn entry_count(&self) -> usize {
        self.history.lock().entries.len()
    }

    /// Title stored with the current entry.
    pub fn current_title(&self) -> String {
        let history = self.history.lock();
        history.entries[history.index].title.clone()
    }

    /// State stored with the current entry.
    pub fn current_state(&self) -> serde_json::Value {
        let history = self.history.lock();
        history.entries[history.index].state.clone()
    }
}

fn normalize_base(base: String) -> String {
    let trimmed = base.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    format!("/{trimmed}")
}

impl LocationManager for MemoryLocationManager {
    fn start_listening(&self, listener: LocationListener) {
        trace!("location manager listening");
        *self.listener.lock() = Some(listener);
    }

    fn stop_listening(&self) {
        trace!("location manager stopped listening");
        *self.listener.lock() = None;
    }

    fn get_path(&self) -> String {
        let history = self.history.lock();
        history.entries[history.index].url.clone()
    }

    fn push_state(&self, state: serde_json::Value, title: &str, url: &str) {
        let mut history = self.history.lock();
        let index = history.index;
        // A push drops any forward entries, like the browser does.
        history.entries.truncate(index + 1);
        history.entries.push(HistoryEntry {
            url: url.to_string(),
            title: title.to_string(),
            state,
        });
        history.index += 1;
        trace!(url, entries = history.entries.len(), "pushed history entry");
    }

    fn replace_state(&self, state: serde_json::Value, title: &str, url: &str) {
        let mut history = self.history.lock();
        let index = history.index;
        history.entries[index] = HistoryEntry {
            url: url.to_string(),
            title: title.to_string(),
            state,
        };
        trace!(url, "replaced history entry");
    }

    fn add_base_href(&self, path: &str) -> String {
        if self.base_href.is_empty() {
            normalize_path(path)
        } else {
            format!("{}{}", self.base_href, normalize_path(path))
        }
    }

    fn remove_base_href(&self, path: &str) -> String {
        if !self.base_href.is_empty() {
            if let Some(rest) = path.strip_prefix(&self.base_href) {
                return normalize_path(rest);
            }
        }
        normalize_path(path)
    }

    fn current_path_equals(&self, path: &str) -> bool {
        normalize_path(&self.get_path()) == normalize_path(path)
    }
}

// =============================================================================
// Tests
// =============================================================================
