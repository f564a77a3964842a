//! Billing routes for existing organizations

use axum::{
    extract::{Path, State},
    Json,
};
use orgbill_billing::BillingSummary;
use orgbill_shared::OrgId;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    organizations::Organization,
    state::AppState,
};

/// Billing overview for the settings page
#[derive(Debug, Serialize)]
pub struct BillingSummaryResponse {
    #[serde(flatten)]
    pub summary: BillingSummary,
    pub portal_available: bool,
    pub seats_out_of_sync: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncSeatsResponse {
    pub seat_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub synced_at: OffsetDateTime,
    pub message: String,
}

/// Response from creating a portal session
#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub portal_url: String,
}

async fn load_org(state: &AppState, org_id: i64) -> ApiResult<Organization> {
    state
        .orgs
        .get(OrgId(org_id))
        .await?
        .ok_or(ApiError::NotFound)
}

/// Get the organization's billing summary
pub async fn get_billing(
    State(state): State<AppState>,
    Path(org_id): Path<i64>,
) -> ApiResult<Json<BillingSummaryResponse>> {
    let org = load_org(&state, org_id).await?;
    let summary = state.billing.billing_summary(org.id).await;

    Ok(Json(BillingSummaryResponse {
        portal_available: summary.portal_available(),
        seats_out_of_sync: summary.seats_out_of_sync(),
        summary,
    }))
}

/// Push the current seat count to the subscription
pub async fn sync_seats(
    State(state): State<AppState>,
    Path(org_id): Path<i64>,
) -> ApiResult<Json<SyncSeatsResponse>> {
    let org = load_org(&state, org_id).await?;
    let outcome = state.billing.sync_seats(org.id).await?;

    Ok(Json(SyncSeatsResponse {
        message: outcome.message(),
        seat_count: outcome.seat_count,
        synced_at: outcome.synced_at,
    }))
}

/// Open the payments-service customer portal
pub async fn create_portal_session(
    State(state): State<AppState>,
    Path(org_id): Path<i64>,
) -> ApiResult<Json<PortalResponse>> {
    let org = load_org(&state, org_id).await?;
    let portal_url = state.billing.open_portal(org.id, &org.name).await?;

    Ok(Json(PortalResponse { portal_url }))
}
