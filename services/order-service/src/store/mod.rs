//! Persistence gateway used by the workflows.
//!
//! `Store` covers single-statement reads and writes; multi-row writes go
//! through a `StoreTx` obtained from [`Store::begin`]. A transaction that is
//! dropped without [`StoreTx::commit`] rolls back.
//!
//! The production implementation is [`crate::db::Database`]; tests use the
//! in-memory [`memory::MemoryStore`].

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{
    CourierApproval, CourierContact, FulfillmentStatus, Order, OrderDetail, OrderLine,
    OrderRecipient, PaymentStatus, Subscriber,
};

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// Which orders a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    /// Every order
    All,
    /// Orders without a courier whose payment was not refunded
    Available,
}

/// Result of a courier trying to take an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    NotFound,
    /// Another courier already holds the order
    Taken,
    /// The order was cancelled and refunded
    Refunded,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Orders ascending by creation time.
    async fn list_orders(&self, filter: OrderFilter) -> StoreResult<Vec<Order>>;

    async fn find_order(&self, user_id: i64, order_id: i64) -> StoreResult<Option<OrderDetail>>;

    /// Stores the new status and returns the status it replaced, together
    /// with the owner's contact details. `None` when no such order exists.
    ///
    /// The previous status is read under the same row lock as the write, so
    /// concurrent updates to one order each see their predecessor's value.
    async fn set_order_status(
        &self,
        order_id: i64,
        status: FulfillmentStatus,
    ) -> StoreResult<Option<OrderRecipient>>;

    /// Sets the courier and moves the order to `in_transit`.
    async fn assign_courier(&self, order_id: i64, courier_id: i64) -> StoreResult<AssignOutcome>;

    async fn courier_contact(&self, courier_id: i64) -> StoreResult<Option<CourierContact>>;

    async fn set_courier_approval(
        &self,
        courier_id: i64,
        status: CourierApproval,
    ) -> StoreResult<bool>;

    async fn newsletter_subscribers(&self) -> StoreResult<Vec<Subscriber>>;

    async fn ping(&self) -> bool;
}

/// Statements that must run inside one transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Inserts an order with total 0, payment `pending`, status `placed`.
    async fn insert_order(&mut self, user_id: i64, payment_provider: &str) -> StoreResult<i64>;

    async fn product_price(&mut self, product_id: i64) -> StoreResult<Option<Decimal>>;

    /// Locks the stock entry for the rest of the transaction and returns its quantity.
    async fn lock_stock(&mut self, product_id: i64, size_id: i64) -> StoreResult<Option<i32>>;

    /// Adds `delta` to a stock entry, creating the entry when it is missing.
    async fn add_stock(&mut self, product_id: i64, size_id: i64, delta: i32) -> StoreResult<()>;

    async fn insert_line(&mut self, order_id: i64, line: &OrderLine) -> StoreResult<()>;

    async fn set_order_total(&mut self, order_id: i64, total: Decimal) -> StoreResult<()>;

    /// Locks the order row when it belongs to `user_id` and returns its payment status.
    async fn lock_payment_status(
        &mut self,
        order_id: i64,
        user_id: i64,
    ) -> StoreResult<Option<PaymentStatus>>;

    async fn order_lines(&mut self, order_id: i64) -> StoreResult<Vec<OrderLine>>;

    /// Payment `refunded`, status `cancelled`.
    async fn mark_refunded(&mut self, order_id: i64) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
