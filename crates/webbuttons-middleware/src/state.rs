//! [`ActiveState`] – the single source of truth for the button panel.
//!
//! One mutex guards both the active id and the name list.  Every accessor
//! holds the lock only for a copy in or out, so HTTP handlers and the
//! republisher never wait on each other for longer than that.

use std::sync::{Mutex, MutexGuard};

use webbuttons_types::{default_names, ButtonError, ButtonId};

struct Inner {
    active: Option<ButtonId>,
    names: Vec<String>,
}

/// Thread-safe holder of the active button id and the button names.
///
/// # Example
///
/// ```
/// use webbuttons_middleware::ActiveState;
///
/// let state = ActiveState::with_default_names(3).unwrap();
/// state.set_active(2).unwrap();
/// assert_eq!(state.active(), Some(2));
/// assert_eq!(state.names()[0], "Button 1");
/// ```
pub struct ActiveState {
    num_buttons: usize,
    inner: Mutex<Inner>,
}

impl ActiveState {
    /// Create a state for `num_buttons` buttons labelled with `names`.
    ///
    /// An empty `names` list selects the default labels.
    ///
    /// # Errors
    ///
    /// Returns [`ButtonError::Config`] when `num_buttons` is zero or when a
    /// non-empty `names` list does not hold exactly `num_buttons` entries.
    pub fn new(num_buttons: usize, names: Vec<String>) -> Result<Self, ButtonError> {
        if num_buttons == 0 {
            return Err(ButtonError::Config(
                "at least one button is required".to_string(),
            ));
        }
        let names = if names.is_empty() {
            default_names(num_buttons)
        } else if names.len() == num_buttons {
            names
        } else {
            return Err(ButtonError::Config(format!(
                "expected {num_buttons} button names, got {}",
                names.len()
            )));
        };
        Ok(Self {
            num_buttons,
            inner: Mutex::new(Inner { active: None, names }),
        })
    }

    /// Create a state labelled `"Button 1"` … `"Button N"`.
    pub fn with_default_names(num_buttons: usize) -> Result<Self, ButtonError> {
        Self::new(num_buttons, Vec::new())
    }

    /// Number of buttons, fixed at construction.
    pub fn num_buttons(&self) -> usize {
        self.num_buttons
    }

    /// Whether `id` addresses one of the buttons.
    pub fn contains(&self, id: i64) -> bool {
        id >= 1 && id <= self.num_buttons as i64
    }

    /// Mark `id` as the active button.
    ///
    /// # Errors
    ///
    /// Returns [`ButtonError::OutOfRange`] and leaves the state untouched
    /// when `id` is not in `1..=num_buttons`.
    pub fn set_active(&self, id: ButtonId) -> Result<(), ButtonError> {
        self.check_range(i64::from(id))?;
        self.lock().active = Some(id);
        Ok(())
    }

    /// The active button, or `None` when nothing has been selected.
    pub fn active(&self) -> Option<ButtonId> {
        self.lock().active
    }

    /// Rename the button at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ButtonError::OutOfRange`] when `id` is not in
    /// `1..=num_buttons`.
    pub fn set_name(&self, id: ButtonId, name: impl Into<String>) -> Result<(), ButtonError> {
        self.check_range(i64::from(id))?;
        let idx = id as usize - 1;
        self.lock().names[idx] = name.into();
        Ok(())
    }

    /// Replace every name at once.
    ///
    /// # Errors
    ///
    /// Returns [`ButtonError::Config`] when `names` does not hold exactly
    /// `num_buttons` entries.
    pub fn set_names(&self, names: Vec<String>) -> Result<(), ButtonError> {
        if names.len() != self.num_buttons {
            return Err(ButtonError::Config(format!(
                "expected {} button names, got {}",
                self.num_buttons,
                names.len()
            )));
        }
        self.lock().names = names;
        Ok(())
    }

    /// Copy of the current names, in id order.
    pub fn names(&self) -> Vec<String> {
        self.lock().names.clone()
    }

    /// Active id and names read under a single lock.
    pub fn snapshot(&self) -> (Option<ButtonId>, Vec<String>) {
        let inner = self.lock();
        (inner.active, inner.names.clone())
    }

    fn check_range(&self, id: i64) -> Result<(), ButtonError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(ButtonError::OutOfRange {
                id,
                num_buttons: self.num_buttons,
            })
        }
    }

    // The guarded data is plain values, so a panic elsewhere cannot leave it
    // half-written.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ActiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (active, names) = self.snapshot();
        f.debug_struct("ActiveState")
            .field("num_buttons", &self.num_buttons)
            .field("active", &active)
            .field("names", &names)
            .finish()
    }
}
