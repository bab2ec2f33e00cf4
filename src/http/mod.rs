//! HTTP edge (component C8, `spec.md` §4.8): a thin, stateless axum router
//! delegating to the components above (`AppState`).

pub mod audio;
pub mod chat;
pub mod credits;
pub mod error;
pub mod identity;
pub mod progress;
pub mod sessions;
pub mod state;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use self::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Assemble the router the same way the teacher's chat server builds
/// `create_router`: routes first, shared layers last, state bound once.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.upload_max_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sessions", post(sessions::create_session))
        .route(
            "/sessions/:id/upload",
            post(sessions::upload_score).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/sessions/:id/chat", post(chat::chat))
        .route("/sessions/:id/score", get(sessions::get_score))
        .route("/sessions/:id/progress", get(progress::progress))
        .route("/sessions/:id/audio", get(audio::audio))
        .route("/credits/estimate", post(credits::estimate))
        .route("/credits", get(credits::account))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
