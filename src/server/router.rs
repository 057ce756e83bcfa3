//! Server setup and routing.

use axum::Router;
use axum::extract::Request;
use axum::extract::State;
use axum::middleware;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::get;
use axum::routing::put;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::AppState;
use super::api::buffers::get_file;
use super::api::buffers::has_buffers;
use super::api::buffers::healthcheck;
use super::api::buffers::promise;
use super::api::buffers::put_file;

/// Create the application router.
///
/// The upload routes only exist on a writable server; `/has` answers both
/// GET and POST since some clients strip bodies from GET.
pub fn create_router(state: AppState, writable: bool) -> Router {
    let mut router = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/has", get(has_buffers).post(has_buffers));
    if writable {
        router = router
            .route("/promise/{checksum}", put(promise))
            .route("/{checksum}", get(get_file).put(put_file));
    } else {
        router = router.route("/{checksum}", get(get_file));
    }
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            record_last_request,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resets the inactivity clock on request entry and response completion.
async fn record_last_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    state.inactivity.touch();
    let response = next.run(request).await;
    state.inactivity.touch();
    response
}
