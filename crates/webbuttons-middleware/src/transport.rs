//! The transport capability.
//!
//! The [`Republisher`][crate::republisher::Republisher] never speaks to ROS 2
//! directly.  It publishes through a [`Transport`], chosen once at startup:
//!
//! - [`RosbridgeTransport`][crate::rosbridge::RosbridgeTransport] – a
//!   `rosbridge_server` WebSocket in front of a live ROS 2 graph.
//! - [`NullTransport`] – accepts and discards everything; used when no
//!   middleware is configured.

use async_trait::async_trait;
use tracing::debug;
use webbuttons_types::ButtonError;

/// Every external publish channel must implement this trait.
///
/// # Contract
///
/// * `open` – establish the connection and register the output channel for
///   `topic`.  Called once per republisher session, before any publish.
/// * `publish` – emit one selection value on the opened channel.
/// * `close` – unregister the channel and drop the connection.  Called once
///   per session, and only after a successful `open`.
///
/// Errors are reported to the caller, which absorbs them; an implementation
/// never needs to retry on its own.
#[async_trait]
pub trait Transport: Send {
    /// Connect and register the output channel for `topic`.
    async fn open(&mut self, topic: &str) -> Result<(), ButtonError>;

    /// Publish `value` on the channel registered by [`open`][Self::open].
    async fn publish(&mut self, value: i32) -> Result<(), ButtonError>;

    /// Unregister the channel and close the connection.
    async fn close(&mut self) -> Result<(), ButtonError>;

    /// Short human-readable description, used in logs and `/api/health`.
    fn describe(&self) -> String;
}

/// A transport that accepts every call and publishes nowhere.
#[derive(Debug, Default)]
pub struct NullTransport {
    topic: Option<String>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn open(&mut self, topic: &str) -> Result<(), ButtonError> {
        debug!(topic, "null transport opened; selections will not leave the process");
        self.topic = Some(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, value: i32) -> Result<(), ButtonError> {
        debug!(topic = ?self.topic, value, "null transport discarded selection");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ButtonError> {
        self.topic = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}
