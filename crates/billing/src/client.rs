//! Payments sidecar client
//!
//! Typed boundary over the external billing microservice. Every operation is a single
//! request/response with no internal retry; retry policy belongs to the caller.
//!
//! Configuration is read from environment variables:
//! - `PAYMENTS_ENABLED`: turn the organization-creation payment gate on (default: false)
//! - `PAYMENTS_SIDECAR_URL`: base URL of the payments service (default: `http://payments:9000`)
//! - `PAYMENTS_REQUEST_TIMEOUT_SECS`: transport timeout per request (default: 30)
//! - `APP_URL`: public URL of this application, used for redirect URLs (default: `http://localhost:3000/`)

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use url::Url;

use crate::error::{BillingError, BillingResult};

const DEFAULT_SIDECAR_URL: &str = "http://payments:9000";
const DEFAULT_APP_URL: &str = "http://localhost:3000/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest slice of an error body carried into a `Remote` error message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Configuration for the payments sidecar
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Whether organization creation requires payment
    pub enabled: bool,
    /// Base URL of the payments service
    pub sidecar_url: Url,
    /// Public application URL, always ending in `/`
    pub app_url: String,
    /// Transport-level timeout applied to every request
    pub request_timeout: Duration,
}

impl PaymentsConfig {
    /// Create an enabled config for the given sidecar and application URLs
    pub fn new(sidecar_url: &str, app_url: &str) -> BillingResult<Self> {
        let sidecar_url = Url::parse(sidecar_url).map_err(|e| {
            BillingError::Config(format!("PAYMENTS_SIDECAR_URL is not a valid URL: {}", e))
        })?;
        if sidecar_url.cannot_be_a_base() {
            return Err(BillingError::Config(
                "PAYMENTS_SIDECAR_URL must be an absolute http(s) URL".to_string(),
            ));
        }

        Ok(Self {
            enabled: true,
            sidecar_url,
            app_url: normalize_app_url(app_url),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let sidecar_url = std::env::var("PAYMENTS_SIDECAR_URL")
            .unwrap_or_else(|_| DEFAULT_SIDECAR_URL.to_string());
        let app_url = std::env::var("APP_URL").unwrap_or_else(|_| DEFAULT_APP_URL.to_string());

        let timeout_secs = std::env::var("PAYMENTS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let enabled = std::env::var("PAYMENTS_ENABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        Ok(Self::new(&sidecar_url, &app_url)?
            .with_enabled(enabled)
            .with_request_timeout(Duration::from_secs(timeout_secs)))
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn normalize_app_url(app_url: &str) -> String {
    let trimmed = app_url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Treat JSON `null` the same as a missing string field
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The payments service reports a finished checkout through either field, so both count.
pub fn is_paid(status: &str, payment_status: &str) -> bool {
    status == "complete" || payment_status == "paid"
}

/// Checkout session created by the payments service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub checkout_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub session_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub customer_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subscription_id: String,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SessionStatusBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    status: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    payment_status: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    customer_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    subscription_id: String,
}

/// Result of polling a checkout session.
///
/// Both `status` and `payment_status` are kept as the remote sent them; `paid` is their OR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutStatus {
    pub session_id: String,
    pub status: String,
    pub payment_status: String,
    pub customer_id: String,
    pub subscription_id: String,
    pub paid: bool,
}

impl CheckoutStatus {
    fn from_body(session_id: &str, body: SessionStatusBody) -> Self {
        let paid = is_paid(&body.status, &body.payment_status);
        Self {
            session_id: session_id.to_string(),
            status: if body.status.is_empty() {
                "unknown".to_string()
            } else {
                body.status
            },
            payment_status: body.payment_status,
            customer_id: body.customer_id,
            subscription_id: body.subscription_id,
            paid,
        }
    }

    /// Non-paid status describing why the session could not be checked
    fn unavailable(session_id: &str, err: &BillingError) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: format!("unavailable: {}", err),
            payment_status: String::new(),
            customer_id: String::new(),
            subscription_id: String::new(),
            paid: false,
        }
    }
}

/// Subscription as reported by the payments service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default, rename = "customer", deserialize_with = "null_as_empty")]
    pub customer_id: String,
    /// Unix seconds
    #[serde(default)]
    pub current_period_end: i64,
}

#[derive(Debug, Serialize)]
struct PortalRequest<'a> {
    customer_id: &'a str,
    return_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscription_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PortalBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    portal_url: String,
}

/// HTTP client for the payments sidecar
#[derive(Debug, Clone)]
pub struct PaymentsClient {
    http: Client,
    config: PaymentsConfig,
}

impl PaymentsClient {
    /// Create a new payments client from config
    pub fn new(config: PaymentsConfig) -> BillingResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Create a new payments client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Self::new(PaymentsConfig::from_env()?)
    }

    /// Get the config
    pub fn config(&self) -> &PaymentsConfig {
        &self.config
    }

    pub fn gate_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Build a sidecar URL from raw path segments. Each segment is percent-escaped on its
    /// own, so identifiers containing `/`, `?` or `#` stay inside their segment.
    ///
    /// `.` and `..` are refused: the URL parser would resolve them against the path.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> BillingResult<Url> {
        if let Some(segment) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(BillingError::InvalidInput(format!(
                "invalid path segment {:?}",
                segment
            )));
        }

        let mut url = self.config.sidecar_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                BillingError::Config("PAYMENTS_SIDECAR_URL cannot be used as a base".to_string())
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// Create a checkout session for a not-yet-existing organization
    pub async fn create_checkout(
        &self,
        org_name: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutSession> {
        if org_name.is_empty() {
            return Err(BillingError::InvalidInput(
                "organization name is required".to_string(),
            ));
        }

        let url = self.endpoint(&["billing", "org", org_name, "checkout"])?;
        let response = self
            .http
            .post(url)
            .json(&json!({
                "success_url": success_url,
                "cancel_url": cancel_url,
            }))
            .send()
            .await?;

        let response = ensure_success(response, "create checkout").await?;
        let session: CheckoutSession = decode(response, "create checkout").await?;

        if session.checkout_url.is_empty() {
            return Err(BillingError::Remote(
                "create checkout response is missing checkout_url".to_string(),
            ));
        }

        tracing::info!(
            org_name = %org_name,
            session_id = %session.session_id,
            "Created checkout session"
        );

        Ok(session)
    }

    /// Poll a checkout session.
    ///
    /// Never fails: transport, HTTP and decode errors come back as a non-paid status whose
    /// `status` string describes the problem.
    pub async fn get_checkout_status(&self, session_id: &str) -> CheckoutStatus {
        match self.fetch_checkout_status(session_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Checkout status unavailable"
                );
                CheckoutStatus::unavailable(session_id, &e)
            }
        }
    }

    async fn fetch_checkout_status(&self, session_id: &str) -> BillingResult<CheckoutStatus> {
        if session_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "checkout session id is required".to_string(),
            ));
        }

        let url = self.endpoint(&["billing", "session", session_id])?;
        let response = self.http.get(url).send().await?;
        let response = ensure_success(response, "checkout status").await?;
        let body: SessionStatusBody = decode(response, "checkout status").await?;

        Ok(CheckoutStatus::from_body(session_id, body))
    }

    /// Fetch a subscription
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSummary> {
        if subscription_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "subscription id is required".to_string(),
            ));
        }

        let url = self.endpoint(&["billing", "subscription", subscription_id])?;
        let response = self.http.get(url).send().await?;
        let response = ensure_success(response, "fetch subscription").await?;
        decode(response, "fetch subscription").await
    }

    /// Set the billed seat quantity of a subscription
    pub async fn set_subscription_quantity(
        &self,
        subscription_id: &str,
        quantity: u32,
    ) -> BillingResult<()> {
        if subscription_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "subscription id is required".to_string(),
            ));
        }

        let url = self.endpoint(&["billing", "subscription", subscription_id, "quantity"])?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "quantity": quantity }))
            .send()
            .await?;
        ensure_success(response, "set subscription quantity").await?;

        tracing::info!(
            subscription_id = %subscription_id,
            quantity = quantity,
            "Updated subscription quantity"
        );

        Ok(())
    }

    /// Create a customer portal session and return its URL
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        subscription_id: Option<&str>,
        return_url: &str,
    ) -> BillingResult<String> {
        if customer_id.is_empty() {
            return Err(BillingError::InvalidInput(
                "customer id is required".to_string(),
            ));
        }

        let url = self.endpoint(&["billing", "portal"])?;
        let payload = PortalRequest {
            customer_id,
            return_url,
            subscription_id: subscription_id.filter(|id| !id.is_empty()),
        };
        let response = self.http.post(url).json(&payload).send().await?;
        let response = ensure_success(response, "create portal session").await?;
        let body: PortalBody = decode(response, "create portal session").await?;

        if body.portal_url.is_empty() {
            return Err(BillingError::Remote(
                "create portal session response is missing portal_url".to_string(),
            ));
        }

        tracing::info!(customer_id = %customer_id, "Created billing portal session");

        Ok(body.portal_url)
    }
}

/// Turn any non-2xx response into a `Remote` error carrying the status and a bounded
/// slice of the body
async fn ensure_success(response: Response, operation: &str) -> BillingResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        Err(BillingError::Remote(format!("{} failed: {}", operation, status)))
    } else {
        let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        Err(BillingError::Remote(format!(
            "{} failed: {}: {}",
            operation, status, excerpt
        )))
    }
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> BillingResult<T> {
    response.json::<T>().await.map_err(|e| {
        BillingError::Remote(format!("{} returned an invalid body: {}", operation, e))
    })
}
