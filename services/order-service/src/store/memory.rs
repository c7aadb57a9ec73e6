//! In-memory store for tests.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! copy of the state; commit writes the copy back, drop discards it. That is
//! stricter than Postgres (serializable), which is fine for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AssignOutcome, OrderFilter, Store, StoreResult, StoreTx};
use crate::models::{
    CourierApproval, CourierContact, FulfillmentStatus, Order, OrderDetail, OrderLine,
    OrderRecipient, PaymentStatus, Subscriber,
};

#[derive(Debug, Clone)]
struct User {
    email: String,
    first_name: String,
    newsletter: bool,
}

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<i64, User>,
    couriers: BTreeMap<i64, CourierContact>,
    prices: BTreeMap<i64, Decimal>,
    stock: BTreeMap<(i64, i64), i32>,
    orders: BTreeMap<i64, Order>,
    lines: Vec<(i64, OrderLine)>,
    next_order_id: i64,
}

impl State {
    fn lines_of(&self, order_id: i64) -> Vec<OrderLine> {
        self.lines
            .iter()
            .filter(|(id, _)| *id == order_id)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_on: Arc<StdMutex<Option<&'static str>>>,
    stock_touches: Arc<StdMutex<Vec<(i64, i64)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, id: i64, email: &str, first_name: &str, newsletter: bool) {
        self.state.lock().await.users.insert(
            id,
            User {
                email: email.to_string(),
                first_name: first_name.to_string(),
                newsletter,
            },
        );
    }

    pub async fn add_courier(&self, id: i64, email: &str, name: &str, status: CourierApproval) {
        self.state.lock().await.couriers.insert(
            id,
            CourierContact {
                status,
                email: email.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub async fn add_product(&self, id: i64, price: Decimal) {
        self.state.lock().await.prices.insert(id, price);
    }

    pub async fn set_price(&self, id: i64, price: Decimal) {
        self.add_product(id, price).await;
    }

    pub async fn set_stock(&self, product_id: i64, size_id: i64, quantity: i32) {
        self.state
            .lock()
            .await
            .stock
            .insert((product_id, size_id), quantity);
    }

    pub async fn stock(&self, product_id: i64, size_id: i64) -> Option<i32> {
        self.state
            .lock()
            .await
            .stock
            .get(&(product_id, size_id))
            .copied()
    }

    /// Full copy of the stock table, for "nothing else changed" assertions.
    pub async fn stock_snapshot(&self) -> BTreeMap<(i64, i64), i32> {
        self.state.lock().await.stock.clone()
    }

    pub async fn order(&self, order_id: i64) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn line_count(&self) -> usize {
        self.state.lock().await.lines.len()
    }

    pub async fn set_payment_status(&self, order_id: i64, status: PaymentStatus) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&order_id) {
            order.payment_status = status;
        }
    }

    pub async fn courier_status(&self, courier_id: i64) -> Option<CourierApproval> {
        self.state
            .lock()
            .await
            .couriers
            .get(&courier_id)
            .map(|c| c.status)
    }

    /// Every (product, size) stock entry locked or changed inside a
    /// transaction, in call order. Rolled-back transactions are included.
    pub fn stock_touches(&self) -> Vec<(i64, i64)> {
        self.stock_touches
            .lock()
            .map(|touches| touches.clone())
            .unwrap_or_default()
    }

    /// Makes every later call of the named transaction step fail.
    pub fn fail_on(&self, step: &'static str) {
        if let Ok(mut fail_on) = self.fail_on.lock() {
            *fail_on = Some(step);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        let fail_on = self.fail_on.lock().ok().and_then(|f| *f);
        Ok(Box::new(MemoryTx {
            guard,
            work,
            fail_on,
            stock_touches: self.stock_touches.clone(),
        }))
    }

    async fn list_orders(&self, filter: OrderFilter) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| match filter {
                OrderFilter::All => true,
                OrderFilter::Available => {
                    order.courier_id.is_none() && order.payment_status != PaymentStatus::Refunded
                }
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| (order.created_at, order.id));
        Ok(orders)
    }

    async fn find_order(&self, user_id: i64, order_id: i64) -> StoreResult<Option<OrderDetail>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .get(&order_id)
            .filter(|order| order.user_id == user_id)
            .map(|order| OrderDetail {
                order: order.clone(),
                items: state.lines_of(order_id),
            }))
    }

    async fn set_order_status(
        &self,
        order_id: i64,
        status: FulfillmentStatus,
    ) -> StoreResult<Option<OrderRecipient>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        let Some(user) = state.users.get(&order.user_id) else {
            return Ok(None);
        };
        let previous = std::mem::replace(&mut order.status, status);
        Ok(Some(OrderRecipient {
            status: previous,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
        }))
    }

    async fn assign_courier(&self, order_id: i64, courier_id: i64) -> StoreResult<AssignOutcome> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(AssignOutcome::NotFound);
        };
        if order.payment_status == PaymentStatus::Refunded {
            return Ok(AssignOutcome::Refunded);
        }
        match order.courier_id {
            Some(holder) if holder != courier_id => Ok(AssignOutcome::Taken),
            _ => {
                order.courier_id = Some(courier_id);
                order.status = FulfillmentStatus::InTransit;
                Ok(AssignOutcome::Assigned)
            }
        }
    }

    async fn courier_contact(&self, courier_id: i64) -> StoreResult<Option<CourierContact>> {
        Ok(self.state.lock().await.couriers.get(&courier_id).cloned())
    }

    async fn set_courier_approval(
        &self,
        courier_id: i64,
        status: CourierApproval,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.couriers.get_mut(&courier_id) {
            Some(courier) => {
                courier.status = status;
                true
            }
            None => false,
        })
    }

    async fn newsletter_subscribers(&self) -> StoreResult<Vec<Subscriber>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .filter(|user| user.newsletter)
            .map(|user| Subscriber {
                email: user.email.clone(),
                first_name: user.first_name.clone(),
            })
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
    fail_on: Option<&'static str>,
    stock_touches: Arc<StdMutex<Vec<(i64, i64)>>>,
}

impl MemoryTx {
    fn step(&self, name: &'static str) -> StoreResult<()> {
        if self.fail_on == Some(name) {
            return Err(sqlx::Error::Protocol(format!("injected failure in {name}")));
        }
        Ok(())
    }

    fn touch(&self, product_id: i64, size_id: i64) {
        if let Ok(mut touches) = self.stock_touches.lock() {
            touches.push((product_id, size_id));
        }
    }

    fn order_mut(&mut self, order_id: i64) -> StoreResult<&mut Order> {
        self.work
            .orders
            .get_mut(&order_id)
            .ok_or(sqlx::Error::RowNotFound)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_order(&mut self, user_id: i64, payment_provider: &str) -> StoreResult<i64> {
        self.step("insert_order")?;
        if !self.work.users.contains_key(&user_id) {
            return Err(sqlx::Error::Protocol(format!(
                "foreign key violation: user {user_id}"
            )));
        }
        self.work.next_order_id += 1;
        let id = self.work.next_order_id;
        // Strictly increasing timestamps keep listing order deterministic
        let created_at: DateTime<Utc> = Utc::now() + Duration::microseconds(id);
        self.work.orders.insert(
            id,
            Order {
                id,
                user_id,
                total: Decimal::ZERO,
                payment_provider: payment_provider.to_string(),
                payment_status: PaymentStatus::Pending,
                status: FulfillmentStatus::Placed,
                courier_id: None,
                created_at,
            },
        );
        Ok(id)
    }

    async fn product_price(&mut self, product_id: i64) -> StoreResult<Option<Decimal>> {
        self.step("product_price")?;
        Ok(self.work.prices.get(&product_id).copied())
    }

    async fn lock_stock(&mut self, product_id: i64, size_id: i64) -> StoreResult<Option<i32>> {
        self.step("lock_stock")?;
        self.touch(product_id, size_id);
        Ok(self.work.stock.get(&(product_id, size_id)).copied())
    }

    async fn add_stock(&mut self, product_id: i64, size_id: i64, delta: i32) -> StoreResult<()> {
        self.step("add_stock")?;
        self.touch(product_id, size_id);
        let entry = self.work.stock.entry((product_id, size_id)).or_insert(0);
        if *entry + delta < 0 {
            return Err(sqlx::Error::Protocol(
                "check constraint violation: negative stock".into(),
            ));
        }
        *entry += delta;
        Ok(())
    }

    async fn insert_line(&mut self, order_id: i64, line: &OrderLine) -> StoreResult<()> {
        self.step("insert_line")?;
        self.work.lines.push((order_id, line.clone()));
        Ok(())
    }

    async fn set_order_total(&mut self, order_id: i64, total: Decimal) -> StoreResult<()> {
        self.step("set_order_total")?;
        self.order_mut(order_id)?.total = total;
        Ok(())
    }

    async fn lock_payment_status(
        &mut self,
        order_id: i64,
        user_id: i64,
    ) -> StoreResult<Option<PaymentStatus>> {
        self.step("lock_payment_status")?;
        Ok(self
            .work
            .orders
            .get(&order_id)
            .filter(|order| order.user_id == user_id)
            .map(|order| order.payment_status.clone()))
    }

    async fn order_lines(&mut self, order_id: i64) -> StoreResult<Vec<OrderLine>> {
        self.step("order_lines")?;
        Ok(self.work.lines_of(order_id))
    }

    async fn mark_refunded(&mut self, order_id: i64) -> StoreResult<()> {
        self.step("mark_refunded")?;
        let order = self.order_mut(order_id)?;
        order.payment_status = PaymentStatus::Refunded;
        order.status = FulfillmentStatus::Cancelled;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        store.add_user(1, "a@example.com", "Ann", false).await;
        store.set_stock(7, 1, 5).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_order(1, "cash").await.unwrap();
            tx.add_stock(7, 1, -5).await.unwrap();
        }

        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.stock(7, 1).await, Some(5));
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        store.add_user(1, "a@example.com", "Ann", false).await;

        let mut tx = store.begin().await.unwrap();
        let id = tx.insert_order(1, "cash").await.unwrap();
        tx.commit().await.unwrap();

        let order = store.order(id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.status, FulfillmentStatus::Placed);
    }

    #[tokio::test]
    async fn stock_never_goes_negative() {
        let store = MemoryStore::new();
        store.set_stock(7, 1, 1).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.add_stock(7, 1, -2).await.is_err());
    }
}
