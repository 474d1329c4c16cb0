//! Inputs from the surrounding marketplace: the staff directory, delivery
//! legs, and order assignments. The booking engine treats these as
//! prerequisites; they arrive here through the boundary collaborators.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::now_ms;
use super::{Engine, EngineError, apply_delivery_status};

impl Engine {
    /// Add a staff member to the directory. Idempotent for an identical
    /// re-registration; conflicting re-use of an id or email is rejected.
    pub async fn register_admin(&self, id: Ulid, email: String) -> Result<AdminProfile, EngineError> {
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !email.contains('@') {
            return Err(EngineError::Validation("email must contain '@'"));
        }
        if let Some(existing) = self.admin_profile(&id) {
            if existing.email == email {
                return Ok(existing);
            }
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(other) = self.admin_id_for_email(&email) {
            return Err(EngineError::AlreadyExists(other));
        }

        let admin = AdminProfile { id, email };
        let event = Event::AdminRegistered {
            admin: admin.clone(),
        };
        self.wal_append(&event).await?;
        self.index_admin(admin.clone());
        Ok(admin)
    }

    /// Record the seller → admin leg of an order. One active delivery per
    /// product; the admin reference may be id- or email-keyed.
    pub async fn record_delivery(
        &self,
        product_id: Ulid,
        seller_id: Ulid,
        admin: AdminRef,
    ) -> Result<DeliveryRecord, EngineError> {
        // Id references must name a registered admin. Email references are
        // tolerated even when unknown — older records carry emails that may
        // predate the directory.
        if let AdminRef::Id(id) = &admin
            && self.admin_profile(id).is_none()
        {
            return Err(EngineError::NotFound(*id));
        }
        if let Some(existing) = self.delivery_for_product(&product_id) {
            let guard = existing.read().await;
            if guard.status != DeliveryStatus::Cancelled {
                return Err(EngineError::AlreadyExists(guard.id));
            }
        }

        let delivery = DeliveryRecord {
            id: Ulid::new(),
            product_id,
            seller_id,
            admin: admin.clone(),
            status: DeliveryStatus::Pending,
            updated_at: now_ms(),
            completed_at: None,
        };
        let event = Event::DeliveryRecorded {
            delivery: delivery.clone(),
        };
        self.wal_append(&event).await?;
        self.index_delivery(delivery.clone());
        if let Some(admin_id) = self.normalize_admin_ref(&admin) {
            self.notify.send(admin_id, &event);
        }
        Ok(delivery)
    }

    /// Advance a delivery leg. Only the admin the record names may touch
    /// it; completing stamps the completion instant used by temporal
    /// ordering checks.
    pub async fn transition_delivery_status(
        &self,
        actor_admin_id: Ulid,
        delivery_id: Ulid,
        status: DeliveryStatus,
    ) -> Result<DeliveryRecord, EngineError> {
        let rec = self
            .get_delivery(&delivery_id)
            .ok_or(EngineError::NotFound(delivery_id))?;
        let mut guard = rec.write().await;
        if self.normalize_admin_ref(&guard.admin) != Some(actor_admin_id) {
            return Err(EngineError::Authorization("not the delivery's admin"));
        }
        if !guard.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: guard.status.as_str(),
                to: status.as_str(),
            });
        }

        let at = now_ms();
        let event = Event::DeliveryStatusChanged {
            id: delivery_id,
            status,
            at,
        };
        self.wal_append(&event).await?;
        apply_delivery_status(&mut guard, status, at);
        self.notify.send(actor_admin_id, &event);
        Ok(guard.clone())
    }

    /// Bind an order to its staff owner. Write-once: re-recording the same
    /// admin is idempotent, anything else is a conflict.
    pub async fn record_assignment(
        &self,
        order_id: Ulid,
        product_id: Ulid,
        buyer_id: Ulid,
        admin: AdminRef,
    ) -> Result<OrderAssignment, EngineError> {
        if let AdminRef::Id(id) = &admin
            && self.admin_profile(id).is_none()
        {
            return Err(EngineError::NotFound(*id));
        }
        if let Some(existing) = self.assignment_for_product(&product_id) {
            if existing.order_id != order_id {
                return Err(EngineError::AlreadyExists(existing.order_id));
            }
            let same_admin = self.normalize_admin_ref(&existing.assigned_admin)
                == self.normalize_admin_ref(&admin);
            if same_admin && existing.buyer_id == buyer_id {
                return Ok(existing);
            }
            return Err(EngineError::AlreadyExists(order_id));
        }

        let assignment = OrderAssignment {
            order_id,
            product_id,
            buyer_id,
            assigned_admin: admin.clone(),
            assigned_at: now_ms(),
        };
        let event = Event::AssignmentRecorded {
            assignment: assignment.clone(),
        };
        self.wal_append(&event).await?;
        self.index_assignment(assignment.clone());
        if let Some(admin_id) = self.normalize_admin_ref(&admin) {
            self.notify.send(admin_id, &event);
        }
        Ok(assignment)
    }
}
