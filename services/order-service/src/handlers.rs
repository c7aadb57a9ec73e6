// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer).
//
// - Role checks happen here; the workflows take plain ids
// - Every API handler runs through `observed`, which records the request
//   counter and latency histogram with the final status code
// - Business errors become responses through AppError's IntoResponse
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};

use crate::auth::{AuthUser, Role};
use crate::error::AppResult;
use crate::metrics;
use crate::models::*;
use crate::AppState;

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness probe
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "order-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe, fails with 503 while the database is unreachable.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let db_healthy = state.store.ping().await;

    if db_healthy {
        Ok(Json(ReadinessResponse {
            status: "ready".to_string(),
            checks: ReadinessChecks { database: true },
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// Prometheus metrics endpoint
///
/// GET /metrics
///
/// # Example Response
/// ```text
/// # TYPE orders_placed_total counter
/// orders_placed_total 42
/// ```
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// REQUEST METRICS
// =============================================================================

async fn observed<T>(
    method: &'static str,
    endpoint: &'static str,
    success: StatusCode,
    work: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    let start = Instant::now();
    let result = work.await;
    let status = match &result {
        Ok(_) => success,
        Err(e) => e.status_code(),
    };
    metrics::record_http_request(
        method,
        endpoint,
        status.as_u16(),
        start.elapsed().as_secs_f64(),
    );
    result
}

// =============================================================================
// ORDER ENDPOINTS
// =============================================================================

// -----------------------------------------------------------------------------
// PLACE ORDER
// -----------------------------------------------------------------------------
/// Place an order for the authenticated user
///
/// POST /api/v1/orders
///
/// # Response
/// - 201 Created: `{order_id, total, payment_status, status}`
/// - 404 Not Found: a product does not exist
/// - 409 Conflict: not enough stock for a line
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<PlaceOrderRequest>,
) -> AppResult<(StatusCode, Json<PlacedOrder>)> {
    let placed = observed("POST", "/api/v1/orders", StatusCode::CREATED, async move {
        user.require(Role::User)?;
        state.orders.place_order(user.id, request).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(placed)))
}

/// Every order (admin)
///
/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<Json<Vec<Order>>> {
    let orders = observed("GET", "/api/v1/orders", StatusCode::OK, async move {
        user.require(Role::Admin)?;
        state.orders.list_all().await
    })
    .await?;

    Ok(Json(orders))
}

/// Orders a courier may still pick up
///
/// GET /api/v1/orders/available
pub async fn list_available_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<Json<Vec<Order>>> {
    let orders = observed("GET", "/api/v1/orders/available", StatusCode::OK, async move {
        user.require(Role::Courier)?;
        state.orders.list_available().await
    })
    .await?;

    Ok(Json(orders))
}

/// One of the caller's own orders with its line items
///
/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> AppResult<Json<OrderDetail>> {
    let detail = observed("GET", "/api/v1/orders/:id", StatusCode::OK, async move {
        user.require(Role::User)?;
        state.orders.get_order(user.id, order_id).await
    })
    .await?;

    Ok(Json(detail))
}

// -----------------------------------------------------------------------------
// CANCEL ORDER
// -----------------------------------------------------------------------------
/// Cancel one of the caller's orders, refund it and restock its lines
///
/// POST /api/v1/orders/:id/cancel
///
/// # Response
/// - 200 OK: order refunded
/// - 404 Not Found: no such order for this user
/// - 409 Conflict: order already completed or refunded
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> AppResult<Json<CancelledOrder>> {
    let cancelled = observed("POST", "/api/v1/orders/:id/cancel", StatusCode::OK, async move {
        user.require(Role::User)?;
        state.orders.cancel_order(user.id, order_id).await
    })
    .await?;

    Ok(Json(cancelled))
}

/// Set the fulfillment status (admin)
///
/// PUT /api/v1/orders/:id/status
///
/// # Request Body
/// ```json
/// { "status": "arrived" }
/// ```
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
    Json(request): Json<StatusUpdateRequest>,
) -> AppResult<Json<StatusChange>> {
    let change = observed("PUT", "/api/v1/orders/:id/status", StatusCode::OK, async move {
        user.require(Role::Admin)?;
        state.orders.set_status(order_id, &request.status).await
    })
    .await?;

    Ok(Json(change))
}

/// The calling courier takes the order
///
/// POST /api/v1/orders/:id/accept
pub async fn accept_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> AppResult<Json<CourierAssignment>> {
    let assignment = observed("POST", "/api/v1/orders/:id/accept", StatusCode::OK, async move {
        user.require(Role::Courier)?;
        state.orders.assign_courier(order_id, user.id).await
    })
    .await?;

    Ok(Json(assignment))
}

// =============================================================================
// COURIER & NEWSLETTER ENDPOINTS (admin)
// =============================================================================

/// PUT /api/v1/couriers/:id/approval
pub async fn update_courier_approval(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(courier_id): Path<i64>,
    Json(request): Json<StatusUpdateRequest>,
) -> AppResult<Json<ApprovalChange>> {
    let change = observed("PUT", "/api/v1/couriers/:id/approval", StatusCode::OK, async move {
        user.require(Role::Admin)?;
        state.approvals.set_approval(courier_id, &request.status).await
    })
    .await?;

    Ok(Json(change))
}

/// POST /api/v1/newsletter
pub async fn send_newsletter(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<NewsletterRequest>,
) -> AppResult<Json<NewsletterReport>> {
    let report = observed("POST", "/api/v1/newsletter", StatusCode::OK, async move {
        user.require(Role::Admin)?;
        state.newsletter.send(request).await
    })
    .await?;

    Ok(Json(report))
}
