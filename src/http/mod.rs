//! HTTP front door.

mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handle::ClientHandle, session::SessionStore};

pub use middleware::identity_middleware;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Currently published evaluation client.
    pub clients: Arc<ClientHandle>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(clients: Arc<ClientHandle>, sessions: SessionStore) -> AppState {
        AppState { clients, sessions }
    }
}

/// Create the HTTP router with all routes configured.
///
/// Every route except `/health` goes through [`identity_middleware`].
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::greet))
        .route("/ab", get(handlers::ab_test))
        .route("/feature", get(handlers::feature))
        .route("/rollout", get(handlers::rollout))
        .route("/set/user", post(handlers::set_user))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .route("/health", get(handlers::health))
        .with_state(state)
}
