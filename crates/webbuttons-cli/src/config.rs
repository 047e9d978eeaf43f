//! Server configuration – reads an optional `webbuttons.toml`.
//!
//! Lookup order for the file: first command-line argument, then
//! `$WEBBUTTONS_CONFIG`, then `config/webbuttons.toml`.  A missing file is
//! not an error; every field has a default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use webbuttons_middleware::RepublisherSettings;
use webbuttons_types::{ButtonError, DEFAULT_TOPIC};

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/webbuttons.toml";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// HTTP port of the button panel.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of buttons on the panel.
    #[serde(default = "default_num_buttons")]
    pub num_buttons: usize,

    /// JSON file holding the button names.
    #[serde(default = "default_names_file")]
    pub names_file: PathBuf,

    /// How often the names file is checked for changes.
    #[serde(default = "default_names_poll_ms")]
    pub names_poll_ms: u64,

    /// Topic the selection is published on.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// `ws://host:port` of a rosbridge server.  Empty disables publishing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rosbridge_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    5000
}
fn default_num_buttons() -> usize {
    10
}
fn default_names_file() -> PathBuf {
    PathBuf::from("config/buttons.json")
}
fn default_names_poll_ms() -> u64 {
    2000
}
fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_heartbeat_ms() -> u64 {
    1000
}
fn default_shutdown_timeout_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            num_buttons: default_num_buttons(),
            names_file: default_names_file(),
            names_poll_ms: default_names_poll_ms(),
            topic: default_topic(),
            rosbridge_url: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Config {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ButtonError> {
        if self.num_buttons == 0 {
            return Err(ButtonError::Config("num_buttons must be at least 1".to_string()));
        }
        if !self.topic.starts_with('/') {
            return Err(ButtonError::Config(format!(
                "topic '{}' must start with '/'",
                self.topic
            )));
        }
        for (field, value) in [
            ("names_poll_ms", self.names_poll_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("heartbeat_ms", self.heartbeat_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(ButtonError::Config(format!("{field} must be greater than 0")));
            }
        }
        Ok(())
    }

    pub fn republisher_settings(&self) -> RepublisherSettings {
        RepublisherSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ..RepublisherSettings::default()
        }
    }

    pub fn names_poll_interval(&self) -> Duration {
        Duration::from_millis(self.names_poll_ms)
    }
}

/// Resolve the config file path from the command-line argument and
/// `$WEBBUTTONS_CONFIG`.
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var("WEBBUTTONS_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read the config file.  Returns `None` if the file does not exist.
pub(crate) fn read_file(path: &Path) -> Result<Option<Config>, ButtonError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        ButtonError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| ButtonError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Load the config at `path`, apply `WEBBUTTONS_*` overrides and validate.
pub fn load(path: &Path) -> Result<Config, ButtonError> {
    let mut cfg = read_file(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `WEBBUTTONS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WEBBUTTONS_HOST` | `host` |
/// | `WEBBUTTONS_PORT` | `port` |
/// | `WEBBUTTONS_TOPIC` | `topic` |
/// | `WEBBUTTONS_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `WEBBUTTONS_NAMES_FILE` | `names_file` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary variable source.  Unparsable host and
/// port values are ignored.
pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("WEBBUTTONS_HOST")
        && let Ok(host) = v.parse::<IpAddr>()
    {
        cfg.host = host;
    }
    if let Some(v) = lookup("WEBBUTTONS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Some(v) = lookup("WEBBUTTONS_TOPIC") {
        cfg.topic = v;
    }
    if let Some(v) = lookup("WEBBUTTONS_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Some(v) = lookup("WEBBUTTONS_NAMES_FILE") {
        cfg.names_file = PathBuf::from(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.num_buttons, 10);
        assert_eq!(cfg.topic, "/selected_button");
        assert_eq!(cfg.names_file, PathBuf::from("config/buttons.json"));
        assert!(cfg.rosbridge_url.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn republisher_settings_follow_config() {
        let cfg = Config {
            poll_interval_ms: 20,
            heartbeat_ms: 500,
            shutdown_timeout_ms: 750,
            ..Config::default()
        };
        let settings = cfg.republisher_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(20));
        assert_eq!(settings.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(settings.shutdown_timeout, Duration::from_millis(750));
    }

    #[test]
    fn read_file_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = read_file(&dir.path().join("webbuttons.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_for_other_fields() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("webbuttons.toml");
        fs::write(&path, "port = 8081\nnum_buttons = 4\nrosbridge_url = \"ws://robot:9090\"\n")
            .expect("write");

        let cfg = read_file(&path).expect("load ok").expect("some");
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.num_buttons, 4);
        assert_eq!(cfg.rosbridge_url, "ws://robot:9090");
        assert_eq!(cfg.topic, "/selected_button");
        assert_eq!(cfg.heartbeat_ms, 1000);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("webbuttons.toml");
        fs::write(&path, "port = \"not a number\"").expect("write");
        assert!(matches!(read_file(&path), Err(ButtonError::Config(_))));
    }

    #[test]
    fn roundtrip_through_toml() {
        let cfg = Config {
            port: 6000,
            rosbridge_url: "ws://localhost:9090".to_string(),
            ..Config::default()
        };
        let raw = toml::to_string_pretty(&cfg).expect("serialize");
        let back: Config = toml::from_str(&raw).expect("parse");
        assert_eq!(back, cfg);
    }

    #[test]
    fn validate_rejects_zero_buttons() {
        let cfg = Config {
            num_buttons: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ButtonError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let cfg = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn validate_rejects_relative_topic() {
        let cfg = Config {
            topic: "selected_button".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_replace_fields() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("WEBBUTTONS_HOST", "127.0.0.1"),
                ("WEBBUTTONS_PORT", "8181"),
                ("WEBBUTTONS_TOPIC", "/panel/selection"),
                ("WEBBUTTONS_ROSBRIDGE_URL", "ws://robot.local:9090"),
                ("WEBBUTTONS_NAMES_FILE", "/etc/webbuttons/names.json"),
            ]),
        );
        assert_eq!(cfg.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(cfg.port, 8181);
        assert_eq!(cfg.topic, "/panel/selection");
        assert_eq!(cfg.rosbridge_url, "ws://robot.local:9090");
        assert_eq!(cfg.names_file, PathBuf::from("/etc/webbuttons/names.json"));
    }

    #[test]
    fn overrides_ignore_invalid_port_and_host() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[("WEBBUTTONS_PORT", "not-a-port"), ("WEBBUTTONS_HOST", "nowhere")]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn config_path_prefers_argument() {
        let p = config_path(Some("/tmp/custom.toml".to_string()));
        assert_eq!(p, PathBuf::from("/tmp/custom.toml"));
    }
}
