//! `webbuttons` – web button panel that republishes the selection to ROS 2.
//!
//! Startup:
//!
//! 1. Initialise logging (and OTLP export when configured).
//! 2. Load `webbuttons.toml` plus `WEBBUTTONS_*` overrides.
//! 3. Load the button names and start watching the names file.
//! 4. Start the republisher on the configured transport.
//! 5. Serve the panel until Ctrl-C / SIGTERM, then shut everything down in
//!    reverse order.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use webbuttons_cockpit::{CockpitServer, NamesWatcher};
use webbuttons_middleware::{ActiveState, NullTransport, Republisher, RosbridgeTransport, Transport};

use config::Config;

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("webbuttons");

    let path = config::config_path(std::env::args().nth(1));
    let cfg = match config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid configuration, using defaults");
            Config::default()
        }
    };
    info!(
        host = %cfg.host,
        port = cfg.port,
        num_buttons = cfg.num_buttons,
        topic = %cfg.topic,
        names_file = %cfg.names_file.display(),
        "configuration loaded"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg))
}

async fn run(cfg: Config) -> ExitCode {
    let state = match ActiveState::with_default_names(cfg.num_buttons) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!(error = %e, "cannot build button state");
            return ExitCode::FAILURE;
        }
    };

    let names = Arc::new(NamesWatcher::new(&cfg.names_file, cfg.num_buttons));
    names.reload_if_changed(&state);

    let republisher = Arc::new(
        Republisher::new(Arc::clone(&state), select_transport(&cfg), cfg.topic.clone())
            .with_settings(cfg.republisher_settings()),
    );
    republisher.start();

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("shutdown signal received");
        signal_tx.send_replace(true);
    }) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    let poller = Arc::clone(&names).spawn_polling(
        Arc::clone(&state),
        cfg.names_poll_interval(),
        shutdown_rx.clone(),
    );

    let served = CockpitServer::new(state, names)
        .with_republisher(Arc::clone(&republisher))
        .with_host(cfg.host)
        .with_port(cfg.port)
        .run(shutdown_rx)
        .await;

    // ── Teardown ──────────────────────────────────────────────────────────
    shutdown_tx.send_replace(true);
    if let Err(e) = poller.await {
        warn!(error = %e, "names poller ended abnormally");
    }
    if !republisher.shutdown().await {
        warn!("republisher did not stop cleanly");
    }

    match served {
        Ok(()) => {
            info!("webbuttons stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "http server failed");
            ExitCode::FAILURE
        }
    }
}

/// Rosbridge when a URL is configured, otherwise the no-op transport.
fn select_transport(cfg: &Config) -> Box<dyn Transport> {
    let url = cfg.rosbridge_url.trim();
    if url.is_empty() {
        info!("no rosbridge_url configured, selection will not leave this process");
        Box::new(NullTransport::new())
    } else {
        Box::new(RosbridgeTransport::new(url))
    }
}
