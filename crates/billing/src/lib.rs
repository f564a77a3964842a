#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! orgbill Billing Engine
//!
//! Links organizations to an external payments service:
//! - Checkout sessions and the organization-creation payment gate
//! - Durable per-organization billing records
//! - Seat counting from team membership and seat sync to the subscription
//! - Customer portal sessions and a settings-page billing summary

use std::future::Future;
use std::sync::Arc;

use orgbill_shared::OrgId;
use sqlx::PgPool;

pub mod checkout;
pub mod client;
pub mod error;
pub mod portal;
pub mod seats;
pub mod store;
pub mod summary;
pub mod sync;
pub mod teams;

pub use checkout::{
    CheckoutResume, CheckoutService, CheckoutState, CreateOrgError, PendingLinkage,
    CHECKOUT_FAILED_MESSAGE,
};
pub use client::{
    CheckoutSession, CheckoutStatus, PaymentsClient, PaymentsConfig, SubscriptionSummary,
};
pub use error::{BillingError, BillingResult};
pub use portal::PortalService;
pub use seats::{SeatCalculator, SeatSet};
pub use store::{BillingRecord, BillingStore, InMemoryBillingStore, PgBillingStore};
pub use summary::{BillingSummary, SummaryService};
pub use sync::{SeatSyncOutcome, SeatSyncService};
pub use teams::{
    InMemoryTeamDirectory, PgTeamDirectory, Team, TeamDirectory, TeamUnit, OWNER_TEAM_NAME,
};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub client: PaymentsClient,
    pub store: Arc<dyn BillingStore>,
    pub seats: SeatCalculator,
    pub checkout: CheckoutService,
    pub sync: SeatSyncService,
    pub portal: PortalService,
    pub summary: SummaryService,
}

impl BillingService {
    /// Create a billing service over any store and team directory
    pub fn new(
        config: PaymentsConfig,
        store: Arc<dyn BillingStore>,
        teams: Arc<dyn TeamDirectory>,
    ) -> BillingResult<Self> {
        let client = PaymentsClient::new(config)?;
        let seats = SeatCalculator::new(teams);

        Ok(Self {
            checkout: CheckoutService::new(client.clone(), store.clone()),
            sync: SeatSyncService::new(client.clone(), store.clone(), seats.clone()),
            portal: PortalService::new(client.clone(), store.clone()),
            summary: SummaryService::new(client.clone(), store.clone(), seats.clone()),
            client,
            store,
            seats,
        })
    }

    /// Create a billing service backed by PostgreSQL
    pub fn with_postgres(config: PaymentsConfig, pool: PgPool) -> BillingResult<Self> {
        Self::new(
            config,
            Arc::new(PgBillingStore::new(pool.clone())),
            Arc::new(PgTeamDirectory::new(pool)),
        )
    }

    pub fn is_billing_gate_enabled(&self) -> bool {
        self.checkout.gate_enabled()
    }

    pub async fn initiate_checkout(
        &self,
        org_name: &str,
        pending: &mut PendingLinkage,
    ) -> BillingResult<String> {
        self.checkout.initiate_checkout(org_name, pending).await
    }

    pub async fn resume_checkout(
        &self,
        session_id: Option<&str>,
        pending: &mut PendingLinkage,
    ) -> CheckoutResume {
        self.checkout.resume_checkout(session_id, pending).await
    }

    pub async fn link_billing(
        &self,
        org_id: OrgId,
        subscription_id: &str,
        customer_id: &str,
        session_id: &str,
    ) -> bool {
        self.checkout
            .link_billing(org_id, subscription_id, customer_id, session_id)
            .await
    }

    pub async fn create_organization<F, Fut, E>(
        &self,
        billing_token: &str,
        pending: &PendingLinkage,
        create: F,
    ) -> Result<OrgId, CreateOrgError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OrgId, E>>,
    {
        self.checkout
            .create_organization(billing_token, pending, create)
            .await
    }

    pub async fn sync_seats(&self, org_id: OrgId) -> BillingResult<SeatSyncOutcome> {
        self.sync.sync_seats(org_id).await
    }

    pub async fn open_portal(&self, org_id: OrgId, org_name: &str) -> BillingResult<String> {
        self.portal.open_portal(org_id, org_name).await
    }

    pub async fn billing_summary(&self, org_id: OrgId) -> BillingSummary {
        self.summary.billing_summary(org_id).await
    }
}
