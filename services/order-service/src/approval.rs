// =============================================================================
// COURIER APPROVAL
// =============================================================================
// Admins move courier applications between pending, approved and rejected.
// A courier hears about it only when the decision actually changes.
// =============================================================================

use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{ApprovalChange, CourierApproval};
use crate::notify::Notifier;
use crate::store::Store;

#[derive(Clone)]
pub struct CourierApprovals {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl CourierApprovals {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn set_approval(&self, courier_id: i64, requested: &str) -> AppResult<ApprovalChange> {
        let status: CourierApproval = requested.parse()?;

        let contact = self
            .store
            .courier_contact(courier_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Courier {courier_id} not found")))?;

        if !self.store.set_courier_approval(courier_id, status).await? {
            return Err(AppError::NotFound(format!("Courier {courier_id} not found")));
        }
        tracing::info!(
            courier_id,
            from = contact.status.as_str(),
            to = status.as_str(),
            "Courier approval updated"
        );

        let notified = if status.is_decision() && status != contact.status {
            let (subject, body) = approval_email(status, &contact.name);
            self.notifier
                .send_best_effort("courier_approval", &contact.email, &subject, &body)
                .await
        } else {
            false
        };

        Ok(ApprovalChange {
            courier_id,
            previous: contact.status,
            status,
            notified,
        })
    }
}

fn approval_email(status: CourierApproval, name: &str) -> (String, String) {
    let (subject, detail) = match status {
        CourierApproval::Approved => (
            "Your courier application was approved",
            "You can now accept orders from the available orders list.",
        ),
        _ => (
            "Your courier application was not approved",
            "Unfortunately we cannot offer you courier work at this time.",
        ),
    };
    (subject.to_string(), format!("Hi {name},\n\n{detail}\n"))
}
