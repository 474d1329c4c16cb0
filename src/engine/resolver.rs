use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Outcome of admin resolution for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedAdmin {
    Resolved(Ulid),
    Unassigned,
}

/// The places the surrounding system records an order's admin. Tried in
/// this order, each producing a typed result; agreement is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupStrategy {
    /// The write-once assignment record for the order.
    AssignmentRecord,
    /// The admin recorded directly on the product's delivery leg.
    DeliveryLeg,
}

const LOOKUP_ORDER: [LookupStrategy; 2] = [
    LookupStrategy::AssignmentRecord,
    LookupStrategy::DeliveryLeg,
];

impl Engine {
    /// Normalize an `AdminRef` to a directory id. An email that matches no
    /// directory entry yields None — stale references mean "unassigned",
    /// never a panic or a guess.
    pub(super) fn normalize_admin_ref(&self, r: &AdminRef) -> Option<Ulid> {
        match r {
            AdminRef::Id(id) => Some(*id),
            AdminRef::Email(email) => self.admin_id_for_email(email),
        }
    }

    /// Which admin is authoritative for this product's fulfillment?
    ///
    /// When `expect_buyer` is given, an assignment record for a different
    /// buyer is ignored (that buyer has no claim here). If both lookup
    /// paths produce an admin and they disagree after normalization, that
    /// is a data-integrity fault and the request is rejected outright —
    /// picking either value would mask the corruption.
    pub async fn resolve_assigned_admin(
        &self,
        product_id: Ulid,
        expect_buyer: Option<Ulid>,
    ) -> Result<ResolvedAdmin, EngineError> {
        let mut from_assignment: Option<Ulid> = None;
        let mut from_delivery: Option<Ulid> = None;

        for strategy in LOOKUP_ORDER {
            match strategy {
                LookupStrategy::AssignmentRecord => {
                    if let Some(a) = self.assignment_for_product(&product_id)
                        && expect_buyer.is_none_or(|b| b == a.buyer_id)
                    {
                        from_assignment = self.normalize_admin_ref(&a.assigned_admin);
                    }
                }
                LookupStrategy::DeliveryLeg => {
                    if let Some(rec) = self.delivery_for_product(&product_id) {
                        let guard = rec.read().await;
                        if guard.status != DeliveryStatus::Cancelled {
                            from_delivery = self.normalize_admin_ref(&guard.admin);
                        }
                    }
                }
            }
        }

        match (from_assignment, from_delivery) {
            (Some(a), Some(d)) if a != d => Err(EngineError::AssignmentMismatch {
                assignment: a,
                delivery: d,
            }),
            (Some(a), _) => Ok(ResolvedAdmin::Resolved(a)),
            (None, Some(d)) => Ok(ResolvedAdmin::Resolved(d)),
            (None, None) => Ok(ResolvedAdmin::Unassigned),
        }
    }
}
