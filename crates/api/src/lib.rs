//! HTTP API server for the checkout service.
//!
//! Exposes `POST /order/checkout` and operator cancellation on top of a
//! [`CheckoutService`], with structured logging (tracing) and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{CheckoutConfig, CheckoutOrchestrator, CheckoutService, PaymentGateway};
use metrics_exporter_prometheus::PrometheusHandle;
use store::InMemoryStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<dyn CheckoutService>,
    /// Render errors in the plain-string shape older clients expect.
    pub legacy_responses: bool,
}

impl AppState {
    pub fn new(checkout: Arc<dyn CheckoutService>, legacy_responses: bool) -> Self {
        Self {
            checkout,
            legacy_responses,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/order/checkout", post(routes::checkout::checkout))
        .route("/order/{id}/cancel", post(routes::orders::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(axum::middleware::from_fn(auth::principal_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state backed by one in-memory store.
pub fn in_memory_state<G>(
    store: InMemoryStore,
    gateway: G,
    config: CheckoutConfig,
    legacy_responses: bool,
) -> AppState
where
    G: PaymentGateway + 'static,
{
    let orchestrator = CheckoutOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        gateway,
        config,
    );
    AppState::new(Arc::new(orchestrator), legacy_responses)
}
