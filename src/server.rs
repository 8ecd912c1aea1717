use axum::{middleware as axum_mw, routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::demo;
use crate::metrics::stream;
use crate::middleware::{auth, timing};
use crate::AppState;

/// Builds the full router: instrumented application routes plus the
/// credential-gated `/metrics/*` endpoints.
///
/// The timing layer sits on the application routes only, so polling the
/// monitoring endpoints never shows up in their own statistics.
pub fn create_router(state: Arc<AppState>) -> Router {
    // ── Monitoring endpoints (gated) ────────────────────────────
    let monitoring = Router::new()
        .route("/metrics/summary", get(stream::get_summary))
        .route("/metrics/health", get(stream::health))
        .route("/metrics/live", get(stream::live_stream))
        .route_layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::metrics_auth_middleware,
        ));

    // ── Instrumented application routes ─────────────────────────
    let mut app = Router::new();
    if state.config.demo_routes {
        app = app.merge(demo::routes());
    }
    let app = app.layer(axum_mw::from_fn_with_state(
        state.clone(),
        timing::timing_middleware,
    ));

    app.merge(monitoring)
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// Live streams never end on their own, so shutdown closes every live
/// subscription before waiting for in-flight connections to drain.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            state.buffer.close_subscriptions();
        })
        .await
}
