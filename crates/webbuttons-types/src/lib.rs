use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External button identifier. Valid ids are `1..=num_buttons`.
pub type ButtonId = u32;

/// Value published on the topic when no button is selected.
pub const NO_SELECTION: i32 = 0;

/// Topic the selected button is mirrored onto unless configured otherwise.
pub const DEFAULT_TOPIC: &str = "/selected_button";

/// ROS 2 message type carried on the selection topic.
pub const SELECTION_MSG_TYPE: &str = "std_msgs/msg/Int32";

/// Default label for the button at 1-indexed position `id`.
pub fn default_name(id: usize) -> String {
    format!("Button {id}")
}

/// Default labels for `num_buttons` buttons: `"Button 1"`, `"Button 2"`, …
pub fn default_names(num_buttons: usize) -> Vec<String> {
    (1..=num_buttons).map(default_name).collect()
}

/// Error type shared by every webbuttons crate.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonError {
    #[error("button id {id} out of range (1-{num_buttons})")]
    OutOfRange { id: i64, num_buttons: usize },

    #[error("invalid button id: {0}")]
    InvalidId(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("I/O Error: {0}")]
    Io(String),
}
