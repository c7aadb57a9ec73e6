// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures shared by the store, the workflows and the HTTP layer.
//
// NOTES:
// - Statuses are closed enums; the database stores their snake_case text
// - Money is rust_decimal::Decimal, serialized to JSON as a number
// - Request structs carry raw strings where we want to answer with our own
//   validation error instead of a serde rejection
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use thiserror::Error;

// =============================================================================
// STATUS VOCABULARIES
// =============================================================================

/// A status string that is not part of the vocabulary it was parsed against.
#[derive(Debug, Error)]
#[error("unknown {kind} status: {value:?}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// Delivery-lifecycle state of an order.
///
/// Parsing is case-sensitive: `"arrived"` is valid, `"Arrived"` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Placed,
    AwaitingPickup,
    InTransit,
    Arrived,
    Completed,
    PartiallyCompleted,
    Cancelled,
}

impl FulfillmentStatus {
    pub const ALL: [FulfillmentStatus; 7] = [
        FulfillmentStatus::Placed,
        FulfillmentStatus::AwaitingPickup,
        FulfillmentStatus::InTransit,
        FulfillmentStatus::Arrived,
        FulfillmentStatus::Completed,
        FulfillmentStatus::PartiallyCompleted,
        FulfillmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Placed => "placed",
            FulfillmentStatus::AwaitingPickup => "awaiting_pickup",
            FulfillmentStatus::InTransit => "in_transit",
            FulfillmentStatus::Arrived => "arrived",
            FulfillmentStatus::Completed => "completed",
            FulfillmentStatus::PartiallyCompleted => "partially_completed",
            FulfillmentStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses the owner is emailed about when an order enters them.
    pub fn notifies_owner(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Arrived | FulfillmentStatus::PartiallyCompleted
        )
    }
}

impl fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FulfillmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FulfillmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                kind: "fulfillment",
                value: s.to_string(),
            })
    }
}

/// Payment state recorded on an order.
///
/// Providers may write their own values; those are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
    Other(String),
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Other(value) => value,
        }
    }

    /// Completed and refunded orders can no longer be cancelled.
    pub fn is_final(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => PaymentStatus::Pending,
            "completed" => PaymentStatus::Completed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Other(value),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PaymentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Approval state of a courier account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourierApproval {
    Pending,
    Approved,
    Rejected,
}

impl CourierApproval {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierApproval::Pending => "pending",
            CourierApproval::Approved => "approved",
            CourierApproval::Rejected => "rejected",
        }
    }

    /// Decisions (as opposed to resetting to pending) are emailed to the courier.
    pub fn is_decision(&self) -> bool {
        !matches!(self, CourierApproval::Pending)
    }
}

impl FromStr for CourierApproval {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CourierApproval::Pending),
            "approved" => Ok(CourierApproval::Approved),
            "rejected" => Ok(CourierApproval::Rejected),
            _ => Err(UnknownStatus {
                kind: "courier approval",
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// ORDERS
// =============================================================================

/// A user's purchase record.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    /// Sum of unit price snapshot x quantity over the line items
    pub total: Decimal,
    pub payment_provider: String,
    pub payment_status: PaymentStatus,
    pub status: FulfillmentStatus,
    pub courier_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One product-size-quantity entry of an order, priced when the order was placed.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct OrderLine {
    pub product_id: i64,
    pub size_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// An order together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderLine>,
}

/// What a status notification needs to know about an order.
#[derive(Debug, Clone)]
pub struct OrderRecipient {
    pub status: FulfillmentStatus,
    pub email: String,
    pub first_name: String,
}

// -----------------------------------------------------------------------------
// PLACE ORDER REQUEST
// -----------------------------------------------------------------------------
/// Request body for placing an order
///
/// # Example JSON
/// ```json
/// {
///   "payment_provider": "stripe",
///   "items": [{ "product_id": 7, "size_id": 2, "quantity": 1 }]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub payment_provider: String,
    pub items: Vec<LineRequest>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LineRequest {
    pub product_id: i64,
    pub size_id: i64,
    pub quantity: i32,
}

/// Response after an order was placed
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order_id: i64,
    pub total: Decimal,
    pub payment_status: PaymentStatus,
    pub status: FulfillmentStatus,
}

/// Response after an order was cancelled and refunded
#[derive(Debug, Clone, Serialize)]
pub struct CancelledOrder {
    pub order_id: i64,
    pub payment_status: PaymentStatus,
    pub status: FulfillmentStatus,
    /// Number of line items whose quantity went back to stock
    pub restocked_lines: usize,
}

/// Request body for status changes (orders and couriers)
///
/// Kept as a plain string so unknown values surface as our validation error.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

/// Response after an order status change
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub order_id: i64,
    pub previous: FulfillmentStatus,
    pub status: FulfillmentStatus,
    /// Whether an email went out successfully
    pub notified: bool,
}

/// Response after a courier accepted an order
#[derive(Debug, Clone, Serialize)]
pub struct CourierAssignment {
    pub order_id: i64,
    pub courier_id: i64,
    pub status: FulfillmentStatus,
}

// =============================================================================
// COURIERS & NEWSLETTER
// =============================================================================

#[derive(Debug, Clone)]
pub struct CourierContact {
    pub status: CourierApproval,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalChange {
    pub courier_id: i64,
    pub previous: CourierApproval,
    pub status: CourierApproval,
    pub notified: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    pub email: String,
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsletterRequest {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewsletterReport {
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

/// Simple health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Detailed readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: bool,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type/code
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfillment_status_parsing_is_exact() {
        assert_eq!(
            "partially_completed".parse::<FulfillmentStatus>().unwrap(),
            FulfillmentStatus::PartiallyCompleted
        );
        assert!("shipped_via_drone".parse::<FulfillmentStatus>().is_err());
        assert!("Arrived".parse::<FulfillmentStatus>().is_err());
        assert!(" arrived".parse::<FulfillmentStatus>().is_err());
    }

    #[test]
    fn only_arrival_statuses_notify() {
        let notifying: Vec<_> = FulfillmentStatus::ALL
            .into_iter()
            .filter(FulfillmentStatus::notifies_owner)
            .collect();
        assert_eq!(
            notifying,
            vec![
                FulfillmentStatus::Arrived,
                FulfillmentStatus::PartiallyCompleted
            ]
        );
    }

    #[test]
    fn provider_payment_statuses_are_preserved() {
        let status = PaymentStatus::from("authorized".to_string());
        assert_eq!(status, PaymentStatus::Other("authorized".into()));
        assert_eq!(status.as_str(), "authorized");
        assert!(!status.is_final());
        assert!(PaymentStatus::from("refunded".to_string()).is_final());
        assert_eq!(
            serde_json::to_value(PaymentStatus::Completed).unwrap(),
            serde_json::json!("completed")
        );
    }

    #[test]
    fn order_detail_flattens_order_fields() {
        let detail = OrderDetail {
            order: Order {
                id: 1,
                user_id: 42,
                total: Decimal::new(1999, 2),
                payment_provider: "stripe".into(),
                payment_status: PaymentStatus::Pending,
                status: FulfillmentStatus::Placed,
                courier_id: None,
                created_at: Utc::now(),
            },
            items: vec![],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["user_id"], 42);
        assert_eq!(json["status"], "placed");
        assert!((json["total"].as_f64().unwrap() - 19.99).abs() < 1e-9);
        assert!(json["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn money_serializes_as_json_numbers() {
        let placed = serde_json::to_value(PlacedOrder {
            order_id: 1,
            total: Decimal::new(4250, 2),
            payment_status: PaymentStatus::Pending,
            status: FulfillmentStatus::Placed,
        })
        .unwrap();
        assert!(placed["total"].is_number(), "total was {}", placed["total"]);
        assert_eq!(placed["total"].as_f64(), Some(42.5));

        let line = serde_json::to_value(OrderLine {
            product_id: 7,
            size_id: 1,
            quantity: 2,
            unit_price: Decimal::new(1999, 2),
        })
        .unwrap();
        assert!(line["unit_price"].is_number());
    }
}
