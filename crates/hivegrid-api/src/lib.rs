//! hivegrid-api — REST surface for the distributor.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/session` | Create a new session |
//! | GET | `/session/{id}` | Look up a session record |
//! | GET | `/status` | Node directory snapshot |
//! | GET | `/readyz` | Readiness of bus + session map |
//! | POST | `/node` | Administrative node registration |
//! | DELETE | `/node/{id}` | Administrative node removal |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use hivegrid_distributor::Distributor;
use hivegrid_sessionmap::SessionMap;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub distributor: Arc<Distributor>,
    pub sessions: Arc<dyn SessionMap>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/session", post(handlers::new_session))
        .route("/session/{id}", get(handlers::get_session))
        .route("/status", get(handlers::grid_status))
        .route("/readyz", get(handlers::readyz))
        .route("/node", post(handlers::add_node))
        .route("/node/{id}", delete(handlers::remove_node))
        .with_state(state)
}
