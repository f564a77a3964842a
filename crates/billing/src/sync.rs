//! Seat count synchronization with the payments service

use std::sync::Arc;

use orgbill_shared::OrgId;
use serde::Serialize;
use time::OffsetDateTime;

use crate::client::PaymentsClient;
use crate::error::{BillingError, BillingResult};
use crate::seats::SeatCalculator;
use crate::store::{BillingRecord, BillingStore};

/// Result of a successful seat sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatSyncOutcome {
    pub org_id: OrgId,
    pub subscription_id: String,
    pub seat_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
}

impl SeatSyncOutcome {
    pub fn message(&self) -> String {
        format!("Synced seats to {}", self.seat_count)
    }
}

/// Pushes live seat counts to the payments service
#[derive(Clone)]
pub struct SeatSyncService {
    client: PaymentsClient,
    store: Arc<dyn BillingStore>,
    seats: SeatCalculator,
}

impl SeatSyncService {
    pub fn new(client: PaymentsClient, store: Arc<dyn BillingStore>, seats: SeatCalculator) -> Self {
        Self {
            client,
            store,
            seats,
        }
    }

    /// Recompute the organization's seats and set them as the subscription quantity.
    ///
    /// The stored count only changes after the payments service accepted it.
    pub async fn sync_seats(&self, org_id: OrgId) -> BillingResult<SeatSyncOutcome> {
        let record = self
            .store
            .get(org_id)
            .await?
            .filter(BillingRecord::has_subscription)
            .ok_or(BillingError::NoSubscription)?;

        let seats = self.seats.compute_write_member_ids(org_id).await?;
        let seat_count = seats.count();

        self.client
            .set_subscription_quantity(&record.subscription_id, seat_count)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    org_id = %org_id,
                    subscription_id = %record.subscription_id,
                    seat_count = seat_count,
                    error = %e,
                    "Payments service rejected seat count"
                );
            })?;

        let synced_at = OffsetDateTime::now_utc();
        let updated = BillingRecord {
            last_seat_count: seat_count,
            last_synced_at: Some(synced_at),
            ..record
        };
        self.store.upsert(&updated).await?;

        tracing::info!(
            org_id = %org_id,
            subscription_id = %updated.subscription_id,
            seat_count = seat_count,
            "Synced seats"
        );

        Ok(SeatSyncOutcome {
            org_id,
            subscription_id: updated.subscription_id,
            seat_count,
            synced_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PaymentsConfig;
    use crate::store::InMemoryBillingStore;
    use crate::teams::InMemoryTeamDirectory;

    #[test]
    fn test_outcome_message() {
        let outcome = SeatSyncOutcome {
            org_id: OrgId(1),
            subscription_id: "sub_1".to_string(),
            seat_count: 4,
            synced_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(outcome.message(), "Synced seats to 4");
    }

    #[tokio::test]
    async fn test_missing_record_is_no_subscription() {
        let client =
            PaymentsClient::new(PaymentsConfig::new("http://127.0.0.1:1", "http://localhost/").unwrap())
                .unwrap();
        let store = Arc::new(InMemoryBillingStore::new());
        let seats = SeatCalculator::new(Arc::new(InMemoryTeamDirectory::new()));

        let err = SeatSyncService::new(client, store, seats)
            .sync_seats(OrgId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NoSubscription));
        assert_eq!(err.user_message(), "No subscription found to sync seats");
    }
}
