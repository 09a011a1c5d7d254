//! Defines every route the service exposes.
//!
//! ## Structure
//! - **Public**
//!   - `GET  /health`         : liveness
//!   - `GET  /readyz`         : database + storage readiness
//!   - `GET  /objects/{*key}` : stream a stored video
//!
//! - **Authenticated** (`Authorization: Bearer <id token>`)
//!   - `POST /api/upload-video` : multipart upload (`video`, optional `hand`)
//!   - `GET  /api/user-shots`   : the caller's shots, oldest first
//!
//! - **ML worker** (mounted only when a worker token is configured)
//!   - `PUT  /internal/shots/{owner}/{id}/analysis`

use crate::{
    handlers::{
        health_handlers::{health, readyz},
        object_handlers::get_object,
        shot_handlers::{record_analysis, upload_video, user_shots},
    },
    services::auth::require_auth,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Allowance on top of the file cap for multipart boundaries and small fields.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the router for all routes.
///
/// The authenticated routes share one `require_auth` layer, which runs before
/// any handler reads the request body.
pub fn routes(state: &AppState) -> Router<AppState> {
    let body_limit = state
        .shots
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES)
        .try_into()
        .unwrap_or(usize::MAX);

    let api = Router::new()
        .route(
            "/api/upload-video",
            post(upload_video).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/user-shots", get(user_shots))
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_auth,
        ));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/objects/{*key}", get(get_object))
        .merge(api);

    if state.worker_token.is_some() {
        router = router.route(
            "/internal/shots/{owner}/{id}/analysis",
            put(record_analysis),
        );
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
