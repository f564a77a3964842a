//! Checkout sessions and the organization-creation payment gate
//!
//! Before an organization exists its billing state lives in a [`PendingLinkage`] that the
//! caller carries between requests (session, cookie or form). Once the organization is
//! created the linkage is written to the billing store and discarded.

use std::future::Future;
use std::sync::Arc;

use orgbill_shared::OrgId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::client::{CheckoutStatus, PaymentsClient};
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingRecord, BillingStore};

/// Shown when a checkout session could not be created
pub const CHECKOUT_FAILED_MESSAGE: &str = "Failed to generate payment checkout";

/// Placeholder the payments service replaces with the real session ID on redirect
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Billing identifiers gathered during a creation flow, before the organization exists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLinkage {
    #[serde(default)]
    pub checkout_session_id: String,
    #[serde(default)]
    pub checkout_url: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub customer_id: String,
}

impl PendingLinkage {
    pub fn has_active_subscription(&self) -> bool {
        !self.subscription_id.is_empty()
    }

    pub fn has_session(&self) -> bool {
        !self.checkout_session_id.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Where a creation attempt stands with respect to payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    /// No checkout session has been started
    NoSession,
    /// The payments service reports the session still open
    Pending,
    Paid,
    /// Any other outcome, including an unreachable payments service
    Unpaid,
}

impl CheckoutState {
    fn from_status(status: &CheckoutStatus) -> Self {
        if status.paid {
            CheckoutState::Paid
        } else if status.status == "open" {
            CheckoutState::Pending
        } else {
            CheckoutState::Unpaid
        }
    }
}

/// Outcome of resuming a checkout on a creation-page visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResume {
    pub state: CheckoutState,
    pub paid: bool,
    /// Remote session status, or a description of why it could not be read
    pub status: String,
    pub payment_status: String,
    pub session_id: String,
    pub subscription_id: String,
    pub customer_id: String,
    /// Token to submit with the create request; set only once paid
    pub billing_token: String,
    pub has_active_subscription: bool,
}

/// Organization creation refused or failed
#[derive(Debug, Error)]
pub enum CreateOrgError<E> {
    #[error("Payment is required to create an organization")]
    Blocked,

    #[error("{0}")]
    Create(E),
}

/// Checkout orchestration for organizations that do not exist yet
#[derive(Clone)]
pub struct CheckoutService {
    client: PaymentsClient,
    store: Arc<dyn BillingStore>,
}

impl CheckoutService {
    pub fn new(client: PaymentsClient, store: Arc<dyn BillingStore>) -> Self {
        Self { client, store }
    }

    pub fn gate_enabled(&self) -> bool {
        self.client.gate_enabled()
    }

    /// Redirect target after a successful checkout
    pub fn success_url(&self, org_name: &str) -> String {
        format!(
            "{}org/create?checkout_session_id={}&org_name={}",
            self.client.config().app_url,
            SESSION_ID_PLACEHOLDER,
            encode_query_value(org_name)
        )
    }

    /// Redirect target when the user abandons checkout
    pub fn cancel_url(&self, org_name: &str) -> String {
        format!(
            "{}org/create?org_name={}",
            self.client.config().app_url,
            encode_query_value(org_name)
        )
    }

    /// Start a checkout for a future organization and return the URL to send the user to.
    ///
    /// The new session replaces whatever `pending` carried before.
    pub async fn initiate_checkout(
        &self,
        org_name: &str,
        pending: &mut PendingLinkage,
    ) -> BillingResult<String> {
        let session = self
            .client
            .create_checkout(org_name, &self.success_url(org_name), &self.cancel_url(org_name))
            .await
            .inspect_err(|e| {
                tracing::warn!(org_name = %org_name, error = %e, "Checkout creation failed");
            })?;

        *pending = PendingLinkage {
            checkout_session_id: session.session_id,
            checkout_url: session.checkout_url.clone(),
            subscription_id: session.subscription_id,
            customer_id: session.customer_id,
        };

        Ok(session.checkout_url)
    }

    /// Check a checkout session, taken from `session_id` when given or else from `pending`.
    ///
    /// Never fails. A paid session's subscription and customer are adopted into `pending`.
    pub async fn resume_checkout(
        &self,
        session_id: Option<&str>,
        pending: &mut PendingLinkage,
    ) -> CheckoutResume {
        let explicit = session_id.map(str::trim).filter(|id| !id.is_empty());
        let session_id = match explicit {
            Some(id) => id.to_string(),
            None if pending.has_session() => pending.checkout_session_id.clone(),
            None => {
                return CheckoutResume {
                    state: CheckoutState::NoSession,
                    paid: false,
                    status: String::new(),
                    payment_status: String::new(),
                    session_id: String::new(),
                    subscription_id: pending.subscription_id.clone(),
                    customer_id: pending.customer_id.clone(),
                    billing_token: String::new(),
                    has_active_subscription: pending.has_active_subscription(),
                };
            }
        };

        if pending.checkout_session_id != session_id {
            pending.checkout_session_id = session_id.clone();
            pending.checkout_url.clear();
        }

        let status = self.client.get_checkout_status(&session_id).await;
        let state = CheckoutState::from_status(&status);

        if status.paid {
            if !status.subscription_id.is_empty() {
                pending.subscription_id = status.subscription_id.clone();
            }
            if !status.customer_id.is_empty() {
                pending.customer_id = status.customer_id.clone();
            }
            tracing::info!(
                session_id = %session_id,
                subscription_id = %pending.subscription_id,
                "Checkout paid"
            );
        } else {
            tracing::debug!(
                session_id = %session_id,
                status = %status.status,
                "Checkout not paid"
            );
        }

        CheckoutResume {
            state,
            paid: status.paid,
            billing_token: if status.paid {
                session_id.clone()
            } else {
                String::new()
            },
            status: status.status,
            payment_status: status.payment_status,
            session_id,
            subscription_id: pending.subscription_id.clone(),
            customer_id: pending.customer_id.clone(),
            has_active_subscription: pending.has_active_subscription(),
        }
    }

    /// Gate check for organization creation.
    ///
    /// Allowed when the gate is off, the pending linkage already carries a subscription, or
    /// a non-blank billing token came with the request.
    pub fn authorize_creation(
        &self,
        billing_token: &str,
        pending: &PendingLinkage,
    ) -> BillingResult<()> {
        if !self.gate_enabled()
            || pending.has_active_subscription()
            || !billing_token.trim().is_empty()
        {
            return Ok(());
        }
        Err(BillingError::GateBlocked)
    }

    /// Gate check, then `create` exactly once, then a best-effort billing link.
    ///
    /// `create` is not invoked when the gate refuses. Its error is returned unchanged.
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
        if self.authorize_creation(billing_token, pending).is_err() {
            tracing::info!(
                session_id = %pending.checkout_session_id,
                "Organization creation blocked: payment required"
            );
            return Err(CreateOrgError::Blocked);
        }

        let org_id = create().await.map_err(CreateOrgError::Create)?;

        let token = billing_token.trim();
        let session_id = if token.is_empty() {
            pending.checkout_session_id.as_str()
        } else {
            token
        };
        self.link_billing(
            org_id,
            &pending.subscription_id,
            &pending.customer_id,
            session_id,
        )
        .await;

        Ok(org_id)
    }

    /// Associate an organization with known billing identifiers.
    ///
    /// Writes nothing when neither a subscription nor a session is known. Empty identifiers
    /// never overwrite stored ones. Failures are logged and swallowed; returns whether the
    /// link was written.
    pub async fn link_billing(
        &self,
        org_id: OrgId,
        subscription_id: &str,
        customer_id: &str,
        session_id: &str,
    ) -> bool {
        if org_id.is_zero() || (subscription_id.is_empty() && session_id.is_empty()) {
            return false;
        }

        let existing = match self.store.get(org_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(
                    org_id = %org_id,
                    error = %e,
                    "Failed to load billing record for linkage"
                );
                return false;
            }
        };

        let mut record = existing.unwrap_or_else(|| BillingRecord::new(org_id));
        if !subscription_id.is_empty() {
            record.subscription_id = subscription_id.to_string();
        }
        if !customer_id.is_empty() {
            record.customer_id = customer_id.to_string();
        }
        if !session_id.is_empty() {
            record.checkout_session_id = session_id.to_string();
        }

        match self.store.upsert(&record).await {
            Ok(()) => {
                tracing::info!(
                    org_id = %org_id,
                    subscription_id = %record.subscription_id,
                    session_id = %record.checkout_session_id,
                    "Linked organization billing"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    org_id = %org_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Failed to link organization billing"
                );
                false
            }
        }
    }
}

fn encode_query_value(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
