//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Persistence layer unavailable or a constraint was violated
    #[error("Database error: {0}")]
    Storage(String),

    /// Team or member enumeration failed; no partial seat count is produced
    #[error("Membership lookup failed: {0}")]
    Lookup(String),

    /// The payments service returned an error status, a malformed body, or broke its
    /// response contract
    #[error("Payments service error: {0}")]
    Remote(String),

    #[error("Payment is required to create an organization")]
    GateBlocked,

    #[error("No subscription found to sync seats")]
    NoSubscription,

    #[error("No billing customer found for this organization")]
    NoCustomer,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Business refusals are expected outcomes, not faults
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            BillingError::GateBlocked | BillingError::NoSubscription | BillingError::NoCustomer
        )
    }

    /// Message suitable for showing to the person who triggered the operation.
    ///
    /// Storage details never leak; remote failures keep their reason since the user
    /// may act on it (retry later, contact support).
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Storage(_) => "Billing records are temporarily unavailable".to_string(),
            BillingError::Lookup(_) => "Failed to compute seat count".to_string(),
            BillingError::Remote(reason) => format!("Payments service error: {}", reason),
            BillingError::Config(_) => "Billing is not configured".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Remote(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
