//! Billing overview for organization settings pages
//!
//! Assembled best-effort: each part that cannot be loaded is logged and left empty, so a
//! settings page always renders.

use std::sync::Arc;

use orgbill_shared::OrgId;
use serde::Serialize;

use crate::client::{PaymentsClient, SubscriptionSummary};
use crate::seats::SeatCalculator;
use crate::store::{BillingRecord, BillingStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingSummary {
    /// Whether the payment gate is on; everything else is empty when it is off
    pub enabled: bool,
    pub record: Option<BillingRecord>,
    /// Live seat count from current membership
    pub current_seat_count: Option<u32>,
    pub subscription: Option<SubscriptionSummary>,
    /// Stored customer, or the subscription's when none is stored
    pub customer_id: String,
}

impl BillingSummary {
    pub fn portal_available(&self) -> bool {
        !self.customer_id.is_empty()
    }

    /// Whether membership changed since the last accepted sync
    pub fn seats_out_of_sync(&self) -> bool {
        match (&self.record, self.current_seat_count) {
            (Some(record), Some(current)) => record.last_seat_count != current,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct SummaryService {
    client: PaymentsClient,
    store: Arc<dyn BillingStore>,
    seats: SeatCalculator,
}

impl SummaryService {
    pub fn new(client: PaymentsClient, store: Arc<dyn BillingStore>, seats: SeatCalculator) -> Self {
        Self {
            client,
            store,
            seats,
        }
    }

    pub async fn billing_summary(&self, org_id: OrgId) -> BillingSummary {
        if !self.client.gate_enabled() {
            return BillingSummary::default();
        }

        let record = match self.store.get(org_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Failed to load billing record");
                None
            }
        };

        let current_seat_count = match self.seats.compute_write_member_ids(org_id).await {
            Ok(seats) => Some(seats.count()),
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Failed to compute seat count");
                None
            }
        };

        let subscription = match record.as_ref().filter(|r| r.has_subscription()) {
            Some(r) => match self.client.get_subscription(&r.subscription_id).await {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    tracing::warn!(
                        org_id = %org_id,
                        subscription_id = %r.subscription_id,
                        error = %e,
                        "Failed to fetch subscription"
                    );
                    None
                }
            },
            None => None,
        };

        let customer_id = record
            .as_ref()
            .map(|r| r.customer_id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| subscription.as_ref().map(|s| s.customer_id.clone()))
            .unwrap_or_default();

        BillingSummary {
            enabled: true,
            record,
            current_seat_count,
            subscription,
            customer_id,
        }
    }
}
