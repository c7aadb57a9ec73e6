// =============================================================================
// ORDER SERVICE
// =============================================================================
// Order lifecycle for the shop: placement with stock decrement, cancellation
// with refund and restock, fulfillment status updates with owner emails,
// courier hand-off, courier approval and the newsletter.
// =============================================================================

pub mod approval;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod newsletter;
pub mod notify;
pub mod orders;
pub mod store;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::approval::CourierApprovals;
use crate::newsletter::Newsletter;
use crate::notify::Notifier;
use crate::orders::OrderWorkflow;
use crate::store::Store;

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orders: OrderWorkflow,
    pub approvals: CourierApprovals,
    pub newsletter: Newsletter,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Notifier,
        newsletter_concurrency: usize,
        jwt_secret: String,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            orders: OrderWorkflow::new(store.clone(), notifier.clone()),
            approvals: CourierApprovals::new(store.clone(), notifier.clone()),
            newsletter: Newsletter::new(store.clone(), notifier, newsletter_concurrency),
            store,
            jwt_secret,
            metrics_handle,
        }
    }
}

// -----------------------------------------------------------------------------
// ROUTES
// -----------------------------------------------------------------------------
pub fn app(state: Arc<AppState>) -> Router {
    // Everything under /api/v1 needs a valid bearer token
    let api = Router::new()
        .route(
            "/orders",
            post(handlers::place_order).get(handlers::list_orders),
        )
        .route("/orders/available", get(handlers::list_available_orders))
        .route("/orders/:id", get(handlers::get_order))
        .route("/orders/:id/cancel", post(handlers::cancel_order))
        .route("/orders/:id/status", put(handlers::update_order_status))
        .route("/orders/:id/accept", post(handlers::accept_order))
        .route(
            "/couriers/:id/approval",
            put(handlers::update_courier_approval),
        )
        .route("/newsletter", post(handlers::send_newsletter))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
