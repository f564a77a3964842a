//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orgbill_billing::{BillingError, CHECKOUT_FAILED_MESSAGE};
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Billing errors
    /// Creation refused by the payment gate; `form` echoes the submitted fields
    #[error("Payment is required to create an organization")]
    PaymentRequired { form: serde_json::Value },
    #[error("{}", CHECKOUT_FAILED_MESSAGE)]
    CheckoutFailed,
    #[error(transparent)]
    Billing(#[from] BillingError),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Billing
            ApiError::PaymentRequired { .. } => (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REQUIRED", self.to_string()),
            ApiError::CheckoutFailed => (StatusCode::BAD_GATEWAY, "CHECKOUT_FAILED", self.to_string()),
            ApiError::Billing(err) => billing_status(err),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
        };

        let mut body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        if let ApiError::PaymentRequired { form } = self {
            body["form"] = form;
        }

        (status, Json(body)).into_response()
    }
}

fn billing_status(err: &BillingError) -> (StatusCode, &'static str, String) {
    if err.is_refusal() {
        tracing::debug!(error = %err, "Billing request refused");
    }

    let status = match err {
        BillingError::GateBlocked => (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REQUIRED"),
        BillingError::NoSubscription => (StatusCode::BAD_REQUEST, "NO_SUBSCRIPTION"),
        BillingError::NoCustomer => (StatusCode::BAD_REQUEST, "NO_CUSTOMER"),
        BillingError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        BillingError::Remote(_) => (StatusCode::BAD_GATEWAY, "PAYMENTS_ERROR"),
        BillingError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "BILLING_NOT_CONFIGURED"),
        BillingError::Storage(_) | BillingError::Lookup(_) => {
            tracing::error!(error = %err, "Billing operation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "BILLING_ERROR")
        }
    };
    (status.0, status.1, err.user_message())
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
