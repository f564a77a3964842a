//! Customer billing portal

use std::sync::Arc;

use orgbill_shared::OrgId;
use url::Url;

use crate::client::PaymentsClient;
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingRecord, BillingStore};

/// Opens payments-service portal sessions for existing organizations
#[derive(Clone)]
pub struct PortalService {
    client: PaymentsClient,
    store: Arc<dyn BillingStore>,
}

impl PortalService {
    pub fn new(client: PaymentsClient, store: Arc<dyn BillingStore>) -> Self {
        Self { client, store }
    }

    /// Organization settings page the portal returns to
    pub fn return_url(&self, org_name: &str) -> BillingResult<String> {
        let mut url = Url::parse(&self.client.config().app_url)
            .map_err(|e| BillingError::Config(format!("APP_URL is not a valid URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BillingError::Config("APP_URL cannot be used as a base".to_string()))?
            .pop_if_empty()
            .extend(["org", org_name, "settings"]);
        Ok(url.into())
    }

    /// Create a portal session for the organization's billing customer and return its URL.
    ///
    /// A record without a customer but with a subscription recovers the customer from the
    /// subscription and stores it. A failed subscription fetch counts as no customer. No
    /// customer at all fails with `NoCustomer` before any portal request is made.
    pub async fn open_portal(&self, org_id: OrgId, org_name: &str) -> BillingResult<String> {
        let mut record = self
            .store
            .get(org_id)
            .await?
            .ok_or(BillingError::NoCustomer)?;

        if !record.has_customer() && record.has_subscription() {
            self.recover_customer(&mut record).await;
        }

        if !record.has_customer() {
            return Err(BillingError::NoCustomer);
        }

        let subscription_id = Some(record.subscription_id.as_str()).filter(|id| !id.is_empty());
        let portal_url = self
            .client
            .create_portal_session(
                &record.customer_id,
                subscription_id,
                &self.return_url(org_name)?,
            )
            .await?;

        tracing::info!(org_id = %org_id, "Opened billing portal");

        Ok(portal_url)
    }

    async fn recover_customer(&self, record: &mut BillingRecord) {
        let subscription = match self.client.get_subscription(&record.subscription_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(
                    org_id = %record.org_id,
                    subscription_id = %record.subscription_id,
                    error = %e,
                    "Failed to fetch subscription for customer recovery"
                );
                return;
            }
        };
        if subscription.customer_id.is_empty() {
            return;
        }

        record.customer_id = subscription.customer_id;
        if let Err(e) = self.store.upsert(record).await {
            tracing::warn!(
                org_id = %record.org_id,
                error = %e,
                "Failed to store recovered billing customer"
            );
        } else {
            tracing::info!(
                org_id = %record.org_id,
                customer_id = %record.customer_id,
                "Recovered billing customer from subscription"
            );
        }
    }
}
