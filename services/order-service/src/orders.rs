// =============================================================================
// ORDER WORKFLOW
// =============================================================================
// Order placement, cancellation/refund, fulfillment status transitions and
// courier assignment.
//
// CONSISTENCY RULES:
// - Placement and cancellation run in one transaction each; any error before
//   commit drops the transaction and nothing is written
// - Validation happens before the transaction is opened
// - Status emails are sent after the update is durable and never fail the
//   operation
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    CancelledOrder, CourierAssignment, FulfillmentStatus, Order, OrderDetail, OrderLine,
    PaymentStatus, PlaceOrderRequest, PlacedOrder, StatusChange,
};
use crate::notify::Notifier;
use crate::store::{AssignOutcome, OrderFilter, Store};

#[derive(Clone)]
pub struct OrderWorkflow {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl OrderWorkflow {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    // -------------------------------------------------------------------------
    // PLACEMENT
    // -------------------------------------------------------------------------
    /// Create an order and its line items, priced from current product prices.
    ///
    /// Each line's unit price is snapshotted and its stock entry decremented.
    /// An unknown product or a short stock entry aborts the whole order.
    pub async fn place_order(&self, user_id: i64, request: PlaceOrderRequest) -> AppResult<PlacedOrder> {
        validate_placement(&request)?;
        let start = Instant::now();

        let mut tx = self.store.begin().await?;
        let order_id = tx
            .insert_order(user_id, request.payment_provider.trim())
            .await?;

        // Stock rows are locked in key order so concurrent placements and
        // cancellations cannot wait on each other in a cycle
        let mut items = request.items.clone();
        items.sort_by_key(|item| (item.product_id, item.size_id));

        let mut total = Decimal::ZERO;
        for item in &items {
            let unit_price = tx
                .product_price(item.product_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Product {} not found", item.product_id)))?;

            let available = tx
                .lock_stock(item.product_id, item.size_id)
                .await?
                .unwrap_or(0);
            if available < item.quantity {
                return Err(AppError::InsufficientStock {
                    product_id: item.product_id,
                    size_id: item.size_id,
                    available,
                    requested: item.quantity,
                });
            }
            tx.add_stock(item.product_id, item.size_id, -item.quantity)
                .await?;

            let line = OrderLine {
                product_id: item.product_id,
                size_id: item.size_id,
                quantity: item.quantity,
                unit_price,
            };
            tx.insert_line(order_id, &line).await?;
            total += unit_price * Decimal::from(item.quantity);
        }

        tx.set_order_total(order_id, total).await?;
        tx.commit().await?;

        metrics::record_db_query("place_order", start.elapsed().as_secs_f64());
        metrics::record_order_placed();
        tracing::info!(
            order_id,
            user_id,
            total = %total,
            lines = request.items.len(),
            "Order placed"
        );

        Ok(PlacedOrder {
            order_id,
            total,
            payment_status: PaymentStatus::Pending,
            status: FulfillmentStatus::Placed,
        })
    }

    // -------------------------------------------------------------------------
    // CANCELLATION / REFUND
    // -------------------------------------------------------------------------
    /// Return every ordered quantity to stock and mark the order refunded.
    ///
    /// Completed and already refunded orders are rejected without changes.
    pub async fn cancel_order(&self, user_id: i64, order_id: i64) -> AppResult<CancelledOrder> {
        let start = Instant::now();
        let mut tx = self.store.begin().await?;

        let payment_status = tx
            .lock_payment_status(order_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

        if payment_status.is_final() {
            return Err(AppError::InvalidState(format!(
                "Order {order_id} is already {payment_status} and cannot be cancelled"
            )));
        }

        let mut lines = tx.order_lines(order_id).await?;
        lines.sort_by_key(|line| (line.product_id, line.size_id));
        for line in &lines {
            tx.add_stock(line.product_id, line.size_id, line.quantity)
                .await?;
        }
        tx.mark_refunded(order_id).await?;
        tx.commit().await?;

        metrics::record_db_query("cancel_order", start.elapsed().as_secs_f64());
        metrics::record_order_cancelled();
        tracing::info!(
            order_id,
            user_id,
            restocked_lines = lines.len(),
            "Order cancelled and refunded"
        );

        Ok(CancelledOrder {
            order_id,
            payment_status: PaymentStatus::Refunded,
            status: FulfillmentStatus::Cancelled,
            restocked_lines: lines.len(),
        })
    }

    // -------------------------------------------------------------------------
    // STATUS TRANSITION
    // -------------------------------------------------------------------------
    /// Set the fulfillment status. Any vocabulary member may follow any other.
    ///
    /// Entering `arrived` or `partially_completed` from a different status
    /// emails the owner once the update is stored.
    pub async fn set_status(&self, order_id: i64, requested: &str) -> AppResult<StatusChange> {
        let status: FulfillmentStatus = requested.parse()?;
        let start = Instant::now();

        // `recipient.status` is the value this update replaced
        let recipient = self
            .store
            .set_order_status(order_id, status)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

        metrics::record_db_query("set_order_status", start.elapsed().as_secs_f64());
        metrics::record_status_transition(status.as_str());
        tracing::info!(
            order_id,
            from = %recipient.status,
            to = %status,
            "Order status updated"
        );

        let notified = if status.notifies_owner() && status != recipient.status {
            let (subject, body) = status_email(order_id, status, &recipient.first_name);
            self.notifier
                .send_best_effort("order_status", &recipient.email, &subject, &body)
                .await
        } else {
            false
        };

        Ok(StatusChange {
            order_id,
            previous: recipient.status,
            status,
            notified,
        })
    }

    // -------------------------------------------------------------------------
    // COURIERS
    // -------------------------------------------------------------------------
    /// Hand an order to a courier and move it to `in_transit`.
    ///
    /// Re-accepting an order the courier already holds succeeds again.
    pub async fn assign_courier(&self, order_id: i64, courier_id: i64) -> AppResult<CourierAssignment> {
        match self.store.assign_courier(order_id, courier_id).await? {
            AssignOutcome::Assigned => {
                tracing::info!(order_id, courier_id, "Order accepted by courier");
                metrics::record_status_transition(FulfillmentStatus::InTransit.as_str());
                Ok(CourierAssignment {
                    order_id,
                    courier_id,
                    status: FulfillmentStatus::InTransit,
                })
            }
            AssignOutcome::NotFound => Err(AppError::NotFound(format!("Order {order_id} not found"))),
            AssignOutcome::Taken => Err(AppError::InvalidState(format!(
                "Order {order_id} is already assigned to another courier"
            ))),
            AssignOutcome::Refunded => Err(AppError::InvalidState(format!(
                "Order {order_id} was refunded and cannot be delivered"
            ))),
        }
    }

    /// Unassigned, non-refunded orders, oldest first.
    pub async fn list_available(&self) -> AppResult<Vec<Order>> {
        Ok(self.store.list_orders(OrderFilter::Available).await?)
    }

    /// Every order, oldest first.
    pub async fn list_all(&self) -> AppResult<Vec<Order>> {
        Ok(self.store.list_orders(OrderFilter::All).await?)
    }

    pub async fn get_order(&self, user_id: i64, order_id: i64) -> AppResult<OrderDetail> {
        self.store
            .find_order(user_id, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))
    }
}

fn validate_placement(request: &PlaceOrderRequest) -> AppResult<()> {
    if request.payment_provider.trim().is_empty() {
        return Err(AppError::Validation("payment_provider must not be empty".into()));
    }
    if request.items.is_empty() {
        return Err(AppError::Validation("an order needs at least one item".into()));
    }
    if let Some(item) = request.items.iter().find(|item| item.quantity <= 0) {
        return Err(AppError::Validation(format!(
            "quantity for product {} must be positive, got {}",
            item.product_id, item.quantity
        )));
    }
    Ok(())
}

fn status_email(order_id: i64, status: FulfillmentStatus, first_name: &str) -> (String, String) {
    let (subject, detail) = match status {
        FulfillmentStatus::PartiallyCompleted => (
            format!("Order #{order_id} was partially delivered"),
            "Part of your order has been delivered. The remaining items are on their way.",
        ),
        _ => (
            format!("Order #{order_id} has arrived"),
            "Your order has arrived at its destination.",
        ),
    };
    let body = format!("Hi {first_name},\n\n{detail}\n\nOrder: #{order_id}\nStatus: {status}\n");
    (subject, body)
}
