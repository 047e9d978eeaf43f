//! `webbuttons-middleware` – selection state and topic mirroring
//!
//! Holds the shared "active button" state and keeps an external topic in
//! sync with it.
//!
//! # Modules
//!
//! - [`state`] – [`ActiveState`]: mutex-guarded active id and button names,
//!   shared between the HTTP layer (writer) and the republisher (reader).
//! - [`transport`] – the [`Transport`] capability the republisher publishes
//!   through, plus the no-op [`NullTransport`].
//! - [`rosbridge`] – [`RosbridgeTransport`]: publishes `std_msgs/msg/Int32`
//!   frames to a `rosbridge_server` WebSocket.
//! - [`republisher`] – [`Republisher`]: background task applying the
//!   change-or-heartbeat publish policy, with bounded start/stop.
//! - [`stats`] – [`PublishStats`]: counters for every absorbed transport
//!   failure.

pub mod republisher;
pub mod rosbridge;
pub mod state;
pub mod stats;
pub mod transport;

pub use republisher::{Phase, PublishPolicy, Republisher, RepublisherSettings};
pub use rosbridge::RosbridgeTransport;
pub use state::ActiveState;
pub use stats::{PublishStats, StatsSnapshot};
pub use transport::{NullTransport, Transport};
