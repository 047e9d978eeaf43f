//! [`CockpitServer`] – HTTP front end for the button panel.
//!
//! Listens on `0.0.0.0:5000` by default.
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /` | Rendered panel page |
//! | `POST /api/activate` | Validate `{"id": n}` and mark button `n` active |
//! | `POST /api/reload` | Re-check the names file, return current names |
//! | `GET /api/status` | Active id, names and button count |
//! | `GET /api/health` | Republisher phase and publish counters |
//!
//! Every route that shows names first asks the [`NamesWatcher`] whether the
//! names file changed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webbuttons_middleware::{ActiveState, Republisher};
use webbuttons_types::{ButtonError, ButtonId};

use crate::names::NamesWatcher;
use crate::page::render_index;

/// Default TCP port for the panel.
pub const DEFAULT_PORT: u16 = 5000;

// ---------------------------------------------------------------------------
// Shared handler state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    state: Arc<ActiveState>,
    names: Arc<NamesWatcher>,
    republisher: Option<Arc<Republisher>>,
}

impl AppState {
    async fn refresh_names(&self) {
        Arc::clone(&self.names).refresh(Arc::clone(&self.state)).await;
    }
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// HTTP server exposing the button panel and its JSON API.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokio::sync::watch;
/// use webbuttons_middleware::ActiveState;
/// use webbuttons_cockpit::{CockpitServer, NamesWatcher};
///
/// #[tokio::main]
/// async fn main() {
///     let state = Arc::new(ActiveState::with_default_names(10).unwrap());
///     let names = Arc::new(NamesWatcher::new("config/buttons.json", 10));
///     let (_stop_tx, stop_rx) = watch::channel(false);
///     CockpitServer::new(state, names)
///         .run(stop_rx)
///         .await
///         .expect("cockpit server failed");
/// }
/// ```
pub struct CockpitServer {
    app: AppState,
    host: IpAddr,
    port: u16,
}

impl CockpitServer {
    /// Create a server for `state` on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(state: Arc<ActiveState>, names: Arc<NamesWatcher>) -> Self {
        Self {
            app: AppState {
                state,
                names,
                republisher: None,
            },
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }

    /// Report this republisher's phase and counters on `/api/health`.
    pub fn with_republisher(mut self, republisher: Arc<Republisher>) -> Self {
        self.app.republisher = Some(republisher);
        self
    }

    /// Override the listening address (builder-style).
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The route table, with handler state attached.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/api/activate", post(activate))
            .route("/api/reload", post(reload))
            .route("/api/status", get(status))
            .route("/api/health", get(health))
            .with_state(self.app.clone())
    }

    /// Bind the configured address and serve until `shutdown` flips to
    /// `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ButtonError::Io`] if the listener cannot bind or the server
    /// fails.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), ButtonError> {
        let addr = SocketAddr::new(self.host, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ButtonError::Io(format!("bind error on {addr}: {e}")))?;
        info!("button panel listening on http://{addr}");
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound `listener` until `shutdown` flips to `true`.
    ///
    /// In-flight requests are allowed to finish.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ButtonError> {
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // A dropped sender also means shutdown.
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| ButtonError::Io(format!("http server error: {e}")))?;
        info!("button panel stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(app): State<AppState>) -> Response {
    app.refresh_names().await;
    let (active, names) = app.state.snapshot();
    match render_index(&names, active) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!(error = %e, "page render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn activate(State(app): State<AppState>, body: Bytes) -> impl IntoResponse {
    // Malformed bodies are treated like a missing id.
    let doc: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let id = match parse_id(&doc) {
        Ok(id) => id,
        Err(_) => return error_response("invalid id".to_string()),
    };

    let num_buttons = app.state.num_buttons();
    let Some(id) = ButtonId::try_from(id).ok().filter(|_| app.state.contains(id)) else {
        return error_response(format!("id out of range (1-{num_buttons})"));
    };

    match app.state.set_active(id) {
        Ok(()) => {
            debug!(id, "button activated");
            (StatusCode::OK, Json(json!({ "ok": true, "active": id })))
        }
        Err(e) => error_response(e.to_string()),
    }
}

async fn reload(State(app): State<AppState>) -> Json<Value> {
    app.refresh_names().await;
    Json(json!({ "ok": true, "names": app.state.names() }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    ok: bool,
    active: Option<ButtonId>,
    names: Vec<String>,
    num_buttons: usize,
}

async fn status(State(app): State<AppState>) -> Json<StatusResponse> {
    app.refresh_names().await;
    let (active, names) = app.state.snapshot();
    Json(StatusResponse {
        ok: true,
        active,
        names,
        num_buttons: app.state.num_buttons(),
    })
}

async fn health(State(app): State<AppState>) -> Json<Value> {
    let republisher = app.republisher.as_ref().map(|r| {
        json!({
            "phase": r.phase(),
            "topic": r.topic(),
            "transport": r.transport_description(),
            "stats": r.stats().snapshot(),
        })
    });
    Json(json!({ "ok": true, "republisher": republisher }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the button id from an activate request body.
///
/// Accepts a JSON integer (or an integral float) and a string holding an
/// integer.
pub(crate) fn parse_id(doc: &Value) -> Result<i64, ButtonError> {
    let raw = doc
        .get("id")
        .ok_or_else(|| ButtonError::InvalidId("missing id".to_string()))?;
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| ButtonError::InvalidId(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ButtonError::InvalidId(s.clone())),
        other => Err(ButtonError::InvalidId(other.to_string())),
    }
}

fn error_response(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": message })),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
