//! [`Republisher`] – mirrors the active button onto the selection topic.
//!
//! A background task polls [`ActiveState`] every poll interval and publishes
//! the selection through a [`Transport`] when either:
//!
//! * the value changed since the last publish (responsiveness), or
//! * the heartbeat interval elapsed since the last publish (liveness).
//!
//! `0` is published while nothing is selected.
//!
//! Transport failures are absorbed: they are logged, counted in
//! [`PublishStats`], and never stop the loop.  A session whose transport
//! fails to open keeps making publish decisions in degraded mode and simply
//! skips the transport call.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use webbuttons_types::{ButtonId, NO_SELECTION};

use crate::state::ActiveState;
use crate::stats::PublishStats;
use crate::transport::Transport;

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Timing knobs for a [`Republisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepublisherSettings {
    /// Delay between two iterations of the publish loop.
    pub poll_interval: Duration,
    /// Maximum time an unchanged value goes without being republished.
    pub heartbeat_interval: Duration,
    /// How long [`Republisher::shutdown`] waits for the task to finish.
    pub shutdown_timeout: Duration,
    /// Upper bound on [`Transport::open`] before degraded mode kicks in.
    pub open_timeout: Duration,
}

impl Default for RepublisherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(5),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Publish policy
// ────────────────────────────────────────────────────────────────────────────

/// Change-or-heartbeat publish decision.
///
/// ```
/// use std::time::Duration;
/// use tokio::time::Instant;
/// use webbuttons_middleware::PublishPolicy;
///
/// let mut policy = PublishPolicy::new(Duration::from_secs(1));
/// let t0 = Instant::now();
/// assert!(policy.should_publish(0, t0));
/// policy.record(0, t0);
/// assert!(!policy.should_publish(0, t0 + Duration::from_millis(500)));
/// assert!(policy.should_publish(4, t0 + Duration::from_millis(500)));
/// assert!(policy.should_publish(0, t0 + Duration::from_secs(1)));
/// ```
#[derive(Debug, Clone)]
pub struct PublishPolicy {
    heartbeat: Duration,
    last_value: Option<i32>,
    last_time: Option<Instant>,
}

impl PublishPolicy {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            heartbeat,
            last_value: None,
            last_time: None,
        }
    }

    /// Whether `value` should go out at `now`.
    pub fn should_publish(&self, value: i32, now: Instant) -> bool {
        if self.last_value != Some(value) {
            return true;
        }
        match self.last_time {
            Some(last) => now.saturating_duration_since(last) >= self.heartbeat,
            None => true,
        }
    }

    /// Remember that `value` was handed to the transport at `now`, whether
    /// or not the transport accepted it.
    pub fn record(&mut self, value: i32, now: Instant) {
        self.last_value = Some(value);
        self.last_time = Some(now);
    }

    pub fn last_value(&self) -> Option<i32> {
        self.last_value
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Phase
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of a republisher session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    /// No task alive, no transport connection.
    Idle = 0,
    /// Task spawned, transport being opened.
    Starting = 1,
    /// Publish loop active (possibly degraded).
    Running = 2,
    /// Stop observed, transport being closed.
    Stopping = 3,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Phase::Starting,
            2 => Phase::Running,
            3 => Phase::Stopping,
            _ => Phase::Idle,
        }
    }
}

#[derive(Debug)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Republisher
// ────────────────────────────────────────────────────────────────────────────

struct Session {
    stop: watch::Sender<bool>,
    phase: Arc<PhaseCell>,
    handle: JoinHandle<()>,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !*self.stop.borrow()
    }
}

/// Keeps the selection topic in sync with [`ActiveState`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use webbuttons_middleware::{ActiveState, NullTransport, Republisher};
///
/// #[tokio::main]
/// async fn main() {
///     let state = Arc::new(ActiveState::with_default_names(10).unwrap());
///     let republisher = Republisher::new(
///         Arc::clone(&state),
///         Box::new(NullTransport::new()),
///         "/selected_button",
///     );
///     republisher.start();
///     state.set_active(3).unwrap();
///     republisher.shutdown().await;
/// }
/// ```
pub struct Republisher {
    state: Arc<ActiveState>,
    topic: String,
    settings: RepublisherSettings,
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    transport_description: String,
    stats: Arc<PublishStats>,
    session: Mutex<Option<Session>>,
}

impl Republisher {
    /// Create an idle republisher mirroring `state` onto `topic`.
    pub fn new(
        state: Arc<ActiveState>,
        transport: Box<dyn Transport>,
        topic: impl Into<String>,
    ) -> Self {
        let transport_description = transport.describe();
        Self {
            state,
            topic: topic.into(),
            settings: RepublisherSettings::default(),
            transport: Arc::new(AsyncMutex::new(transport)),
            transport_description,
            stats: Arc::new(PublishStats::new()),
            session: Mutex::new(None),
        }
    }

    /// Override the timing settings (builder-style).
    pub fn with_settings(mut self, settings: RepublisherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn settings(&self) -> RepublisherSettings {
        self.settings
    }

    /// Description of the transport this republisher publishes through.
    pub fn transport_description(&self) -> &str {
        &self.transport_description
    }

    /// Shared handle to the publish counters.
    pub fn stats(&self) -> Arc<PublishStats> {
        Arc::clone(&self.stats)
    }

    /// Phase of the current session, [`Phase::Idle`] when there is none.
    pub fn phase(&self) -> Phase {
        match self.lock_session().as_ref() {
            Some(session) if !session.handle.is_finished() => session.phase.get(),
            _ => Phase::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_session().as_ref().is_some_and(Session::is_live)
    }

    /// Spawn the publish task.
    ///
    /// Returns `false` without doing anything when a session is already
    /// running, or when called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = self.lock_session();
        if slot.as_ref().is_some_and(Session::is_live) {
            debug!(topic = %self.topic, "republisher already running");
            return false;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(topic = %self.topic, error = %e, "republisher needs a Tokio runtime");
                return false;
            }
        };

        // Every session gets its own stop channel, so a session detached by a
        // timed-out shutdown stays stopped.
        let (stop_tx, stop_rx) = watch::channel(false);
        let phase = Arc::new(PhaseCell::new(Phase::Starting));
        let worker = Worker {
            state: Arc::clone(&self.state),
            topic: self.topic.clone(),
            settings: self.settings,
            transport: Arc::clone(&self.transport),
            stats: Arc::clone(&self.stats),
            phase: Arc::clone(&phase),
        };
        let handle = runtime.spawn(worker.run(stop_rx));
        *slot = Some(Session {
            stop: stop_tx,
            phase,
            handle,
        });
        info!(topic = %self.topic, transport = %self.transport_description, "republisher started");
        true
    }

    /// Signal the publish task to stop and wait for it, at most
    /// [`RepublisherSettings::shutdown_timeout`].
    ///
    /// Returns `true` when the task finished in time (or none was running).
    /// On timeout the task is left to finish on its own and `false` is
    /// returned.
    pub async fn shutdown(&self) -> bool {
        let Some(session) = self.lock_session().take() else {
            return true;
        };
        // The receiver is gone if the task already ended.
        let _ = session.stop.send(true);

        match timeout(self.settings.shutdown_timeout, session.handle).await {
            Ok(Ok(())) => {
                info!(topic = %self.topic, "republisher stopped");
                true
            }
            Ok(Err(e)) => {
                warn!(topic = %self.topic, error = %e, "republisher task ended abnormally");
                false
            }
            Err(_) => {
                warn!(
                    topic = %self.topic,
                    timeout_ms = self.settings.shutdown_timeout.as_millis() as u64,
                    "republisher did not stop in time; detaching task"
                );
                false
            }
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background task
// ────────────────────────────────────────────────────────────────────────────

struct Worker {
    state: Arc<ActiveState>,
    topic: String,
    settings: RepublisherSettings,
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    stats: Arc<PublishStats>,
    phase: Arc<PhaseCell>,
}

fn selection_value(active: Option<ButtonId>) -> i32 {
    active
        .and_then(|id| i32::try_from(id).ok())
        .unwrap_or(NO_SELECTION)
}

impl Worker {
    #[instrument(name = "republisher", skip_all, fields(topic = %self.topic))]
    async fn run(self, mut stop: watch::Receiver<bool>) {
        // A session detached by an earlier shutdown may still hold the
        // transport; wait for it unless we are stopped first.
        let mut transport = tokio::select! {
            guard = self.transport.lock() => guard,
            _ = stop.changed() => {
                self.phase.set(Phase::Idle);
                return;
            }
        };

        let opened = match timeout(self.settings.open_timeout, transport.open(&self.topic)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "transport unavailable; running without publishing");
                self.stats.record_open_failure(&e.to_string());
                false
            }
            Err(_) => {
                let msg = format!(
                    "transport open timed out after {} ms",
                    self.settings.open_timeout.as_millis()
                );
                warn!(error = %msg, "transport unavailable; running without publishing");
                self.stats.record_open_failure(&msg);
                false
            }
        };
        self.phase.set(Phase::Running);

        let mut policy = PublishPolicy::new(self.settings.heartbeat_interval);
        while !*stop.borrow() {
            let value = selection_value(self.state.active());
            let now = Instant::now();

            if policy.should_publish(value, now) {
                if opened {
                    match transport.publish(value).await {
                        Ok(()) => self.stats.record_delivered(),
                        Err(e) => {
                            warn!(value, error = %e, "publish failed");
                            self.stats.record_failed(&e.to_string());
                        }
                    }
                } else {
                    self.stats.record_skipped();
                }
                policy.record(value, now);
            }

            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                changed = stop.changed() => {
                    // Sender dropped: the owning Republisher is gone.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.phase.set(Phase::Stopping);
        if opened {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "transport close failed");
                self.stats.record_close_failure(&e.to_string());
            }
        }
        self.phase.set(Phase::Idle);
    }
}
