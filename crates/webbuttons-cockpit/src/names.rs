//! Button names file – loading and change detection.
//!
//! The file holds JSON, either a bare list or an object with a `names`
//! list:
//!
//! ```json
//! { "names": ["Left", "", "Right"] }
//! ```
//!
//! Whatever the file says, the result always has exactly one name per
//! button.  Missing or blank entries fall back to `"Button {i}"`, extra
//! entries are dropped, and an unreadable or malformed file yields the full
//! default list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use webbuttons_middleware::ActiveState;
use webbuttons_types::{default_name, default_names, ButtonError};

/// Normalise a parsed names document to exactly `num_buttons` entries.
///
/// Returns `None` when the document holds no list of names.
pub fn normalize_names(doc: &Value, num_buttons: usize) -> Option<Vec<String>> {
    let list = match doc {
        Value::Object(map) => map.get("names")?.as_array()?,
        Value::Array(list) => list,
        _ => return None,
    };
    let names = (0..num_buttons)
        .map(|i| {
            list.get(i)
                .and_then(entry_label)
                .unwrap_or_else(|| default_name(i + 1))
        })
        .collect();
    Some(names)
}

fn entry_label(entry: &Value) -> Option<String> {
    let label = match entry {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!label.trim().is_empty()).then_some(label)
}

/// Read and normalise the names file at `path`.
///
/// # Errors
///
/// Returns [`ButtonError::Config`] when the file cannot be read, is not
/// JSON, or holds no list of names.
pub fn read_names(path: &Path, num_buttons: usize) -> Result<Vec<String>, ButtonError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| ButtonError::Config(format!("failed to read {}: {e}", path.display())))?;
    let doc: Value = serde_json::from_str(&raw)
        .map_err(|e| ButtonError::Config(format!("failed to parse {}: {e}", path.display())))?;
    normalize_names(&doc, num_buttons).ok_or_else(|| {
        ButtonError::Config(format!("{} does not contain a list of names", path.display()))
    })
}

/// Like [`read_names`], but falls back to the default labels on any error.
pub fn load_names(path: &Path, num_buttons: usize) -> Vec<String> {
    match read_names(path, num_buttons) {
        Ok(names) => names,
        Err(e) => {
            debug!(error = %e, "using default button names");
            default_names(num_buttons)
        }
    }
}

/// Reloads the names file into [`ActiveState`] whenever its modification
/// time changes.
pub struct NamesWatcher {
    path: PathBuf,
    num_buttons: usize,
    last_mtime: Mutex<Option<SystemTime>>,
}

impl NamesWatcher {
    pub fn new(path: impl Into<PathBuf>, num_buttons: usize) -> Self {
        Self {
            path: path.into(),
            num_buttons,
            last_mtime: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the names into `state` if the file changed since the last
    /// reload.  A missing file leaves the current names alone.
    ///
    /// Returns `true` when `state` was updated.
    pub fn reload_if_changed(&self, state: &ActiveState) -> bool {
        let Ok(mtime) = fs::metadata(&self.path).and_then(|meta| meta.modified()) else {
            return false;
        };
        let mut last = self
            .last_mtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last == Some(mtime) {
            return false;
        }

        let names = match read_names(&self.path, self.num_buttons) {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "names file invalid; falling back to default names");
                default_names(self.num_buttons)
            }
        };
        if let Err(e) = state.set_names(names) {
            warn!(error = %e, "names reload rejected");
            return false;
        }
        *last = Some(mtime);
        info!(path = %self.path.display(), "button names reloaded");
        true
    }

    /// [`reload_if_changed`][Self::reload_if_changed] on the blocking pool,
    /// for callers running on the async runtime.
    pub async fn refresh(self: Arc<Self>, state: Arc<ActiveState>) -> bool {
        match tokio::task::spawn_blocking(move || self.reload_if_changed(&state)).await {
            Ok(reloaded) => reloaded,
            Err(e) => {
                warn!(error = %e, "names reload task failed");
                false
            }
        }
    }

    /// Poll the file every `every` until `shutdown` flips to `true`.
    pub fn spawn_polling(
        self: Arc<Self>,
        state: Arc<ActiveState>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Arc::clone(&self).refresh(Arc::clone(&state)).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(path = %self.path.display(), "names poller stopped");
        })
    }
}
