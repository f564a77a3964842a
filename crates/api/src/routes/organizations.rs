//! Organization creation routes
//!
//! The pending billing linkage travels with each request and response, so the server keeps
//! no checkout state between calls.

use axum::{extract::State, http::StatusCode, Json};
use orgbill_billing::{BillingError, CheckoutResume, CreateOrgError, PendingLinkage};
use orgbill_shared::UserId;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    organizations::{NewOrganization, Organization, Visibility},
    state::AppState,
};

const MAX_ORG_NAME_LEN: usize = 40;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InitiateCheckoutRequest {
    pub org_name: String,
    #[serde(default)]
    pub pending: PendingLinkage,
}

#[derive(Debug, Serialize)]
pub struct InitiateCheckoutResponse {
    pub checkout_url: String,
    pub pending: PendingLinkage,
}

#[derive(Debug, Deserialize)]
pub struct ResumeCheckoutRequest {
    #[serde(default)]
    pub checkout_session_id: Option<String>,
    #[serde(default)]
    pub pending: PendingLinkage,
}

#[derive(Debug, Serialize)]
pub struct ResumeCheckoutResponse {
    #[serde(flatten)]
    pub resume: CheckoutResume,
    pub gate_enabled: bool,
    /// Whether a create request with `billing_token` would pass the gate
    pub can_create: bool,
    pub pending: PendingLinkage,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub org_name: String,
    pub owner_id: i64,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub billing_token: String,
    #[serde(default)]
    pub pending: PendingLinkage,
}

#[derive(Debug, Serialize)]
pub struct OrgResponse {
    #[serde(flatten)]
    pub org: Organization,
}

// =============================================================================
// Handlers
// =============================================================================

/// Start a checkout for an organization that does not exist yet
pub async fn initiate_checkout(
    State(state): State<AppState>,
    Json(req): Json<InitiateCheckoutRequest>,
) -> ApiResult<Json<InitiateCheckoutResponse>> {
    validate_org_name(&req.org_name)?;

    if !state.billing.is_billing_gate_enabled() {
        return Err(ApiError::BadRequest(
            "Payments are not enabled".to_string(),
        ));
    }

    let mut pending = req.pending;
    let checkout_url = state
        .billing
        .initiate_checkout(&req.org_name, &mut pending)
        .await
        .map_err(|e| match e {
            BillingError::Remote(_) => ApiError::CheckoutFailed,
            other => ApiError::Billing(other),
        })?;

    Ok(Json(InitiateCheckoutResponse {
        checkout_url,
        pending,
    }))
}

/// Check a checkout session on a creation-page visit. Never fails on payments errors.
pub async fn resume_checkout(
    State(state): State<AppState>,
    Json(req): Json<ResumeCheckoutRequest>,
) -> Json<ResumeCheckoutResponse> {
    let mut pending = req.pending;
    let resume = state
        .billing
        .resume_checkout(req.checkout_session_id.as_deref(), &mut pending)
        .await;

    let can_create = state
        .billing
        .checkout
        .authorize_creation(&resume.billing_token, &pending)
        .is_ok();

    Json(ResumeCheckoutResponse {
        resume,
        gate_enabled: state.billing.is_billing_gate_enabled(),
        can_create,
        pending,
    })
}

/// Create an organization behind the payment gate
pub async fn create_org(
    State(state): State<AppState>,
    Json(req): Json<CreateOrgRequest>,
) -> ApiResult<(StatusCode, Json<OrgResponse>)> {
    validate_org_name(&req.org_name)?;
    if req.owner_id <= 0 {
        return Err(ApiError::Validation("owner_id is required".to_string()));
    }

    let new_org = NewOrganization {
        name: req.org_name.clone(),
        owner_id: UserId(req.owner_id),
        visibility: req.visibility,
    };

    let orgs = &state.orgs;
    let new_org = &new_org;
    let mut created: Option<Organization> = None;
    let slot = &mut created;
    let result = state
        .billing
        .create_organization(&req.billing_token, &req.pending, move || async move {
            let org = orgs.create(new_org).await?;
            let org_id = org.id;
            *slot = Some(org);
            Ok::<_, ApiError>(org_id)
        })
        .await;

    match result {
        Ok(_) => {}
        Err(CreateOrgError::Blocked) => {
            return Err(ApiError::PaymentRequired {
                form: json!({
                    "org_name": req.org_name,
                    "visibility": req.visibility,
                    "owner_id": req.owner_id,
                }),
            })
        }
        Err(CreateOrgError::Create(e)) => return Err(e),
    }

    let org = created.ok_or(ApiError::NotFound)?;

    Ok((StatusCode::CREATED, Json(OrgResponse { org })))
}

// =============================================================================
// Validation
// =============================================================================

fn validate_org_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() || name.len() > MAX_ORG_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "Organization name must be between 1 and {} characters",
            MAX_ORG_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ApiError::Validation(
            "Organization name may only contain letters, numbers, '-', '_' and '.'".to_string(),
        ));
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(ApiError::Validation(
            "Organization name cannot start or end with '.'".to_string(),
        ));
    }

    Ok(())
}
