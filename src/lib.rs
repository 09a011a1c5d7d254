//! Backend for the shooting-form video app.
//!
//! Authenticated users upload a video; it is stored in object storage, scored
//! by a placeholder analyzer and recorded as a shot. Users list their own
//! shots. An external ML worker later reports the real analysis.

use axum::Router;

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;

/// Build the fully-stated router.
pub fn build_router(state: AppState) -> Router {
    routes::routes::routes(&state).with_state(state)
}
