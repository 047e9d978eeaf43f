//! `webbuttons-cockpit` – the button panel web front end
//!
//! Serves the panel page and a small JSON API over HTTP (default port
//! `5000`).  Every write goes straight into the shared
//! [`ActiveState`][webbuttons_middleware::ActiveState]; the republisher picks
//! it up on its next tick.
//!
//! # Modules
//!
//! - [`server`] – [`CockpitServer`]: axum routes for the page and
//!   `/api/activate`, `/api/reload`, `/api/status`, `/api/health`.
//! - [`names`] – [`NamesWatcher`]: loads button names from a JSON file and
//!   reloads them when the file's modification time changes.
//! - [`page`] – server-side rendering of the embedded HTML template.

pub mod names;
pub mod page;
pub mod server;

pub use names::{load_names, normalize_names, read_names, NamesWatcher};
pub use server::{CockpitServer, DEFAULT_PORT};
