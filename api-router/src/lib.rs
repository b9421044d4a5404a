use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{delete, get, post},
    Router,
};
use routes::{
    liveness::live,
    progress::progress_ws,
    readiness::ready,
    upload::{cancel, chunk, initiate, status},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1. No authentication middleware:
/// this service has no notion of a user, only opaque upload ids.
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/upload/initiate", post(initiate))
        .route("/upload/chunk/{id}/{index}", post(chunk))
        .route("/upload/status/{id}", get(status))
        .route("/upload/cancel/{id}", delete(cancel))
        .route("/upload/progress", get(progress_ws))
}
