//! Integration tests for the organization paywall
//!
//! Exercises the billing engine end to end through `BillingService`, with mockito standing
//! in for the payments service and the in-memory store and team directory for persistence.
//!
//! ## Running Tests
//! ```bash
//! cargo test -p orgbill-billing --test org_paywall
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mockito::Matcher;
use orgbill_billing::{
    BillingError, BillingRecord, BillingResult, BillingService, BillingStore, CheckoutState,
    CreateOrgError, InMemoryBillingStore, InMemoryTeamDirectory, PaymentsConfig, PendingLinkage,
    Team, TeamUnit, OWNER_TEAM_NAME,
};
use orgbill_shared::{AccessMode, OrgId, TeamId, UnitType, UserId};
use serde_json::json;

// ============================================================================
// Test Utilities
// ============================================================================

const APP_URL: &str = "https://git.example.com/";
const UNREACHABLE: &str = "http://127.0.0.1:1";

struct Harness {
    billing: BillingService,
    store: Arc<InMemoryBillingStore>,
    teams: Arc<InMemoryTeamDirectory>,
}

fn harness(sidecar_url: &str, enabled: bool) -> Harness {
    let config = PaymentsConfig::new(sidecar_url, APP_URL)
        .expect("valid config")
        .with_enabled(enabled);
    let store = Arc::new(InMemoryBillingStore::new());
    let teams = Arc::new(InMemoryTeamDirectory::new());
    let billing = BillingService::new(config, store.clone(), teams.clone()).expect("client");
    Harness {
        billing,
        store,
        teams,
    }
}

fn team(org_id: OrgId, id: i64, name: &str, access_mode: AccessMode) -> Team {
    Team {
        id: TeamId(id),
        org_id,
        name: name.to_string(),
        access_mode,
        can_create_org_repo: false,
        units: Vec::new(),
    }
}

/// Owners {1, 2}, writers {2, 3}, code unit writers {5}, readers {4}: four seats
async fn seed_org3(teams: &InMemoryTeamDirectory) -> OrgId {
    let org = OrgId(3);
    teams
        .add_team(
            team(org, 1, OWNER_TEAM_NAME, AccessMode::Owner),
            vec![UserId(1), UserId(2)],
        )
        .await;
    teams
        .add_team(
            team(org, 2, "writers", AccessMode::Write),
            vec![UserId(2), UserId(3)],
        )
        .await;
    teams
        .add_team(
            Team {
                units: vec![TeamUnit {
                    unit: UnitType::Code,
                    access_mode: AccessMode::Write,
                }],
                ..team(org, 3, "code", AccessMode::Read)
            },
            vec![UserId(5)],
        )
        .await;
    teams
        .add_team(team(org, 4, "readers", AccessMode::Read), vec![UserId(4)])
        .await;
    org
}

async fn subscribed_record(store: &InMemoryBillingStore, org_id: OrgId, last_seat_count: u32) {
    store
        .upsert(&BillingRecord {
            subscription_id: "sub_sync".to_string(),
            customer_id: "cus_sync".to_string(),
            last_seat_count,
            ..BillingRecord::new(org_id)
        })
        .await
        .unwrap();
}

// ============================================================================
// Creation gate
// ============================================================================

#[tokio::test]
async fn test_creation_blocked_without_billing_token() {
    let h = harness(UNREACHABLE, true);
    let calls = AtomicUsize::new(0);

    let result = h
        .billing
        .create_organization("", &PendingLinkage::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(OrgId(10))
        })
        .await;

    assert!(matches!(result, Err(CreateOrgError::Blocked)));
    assert_eq!(
        result.unwrap_err().to_string(),
        "Payment is required to create an organization"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_billing_token_creates_org_and_links_billing() {
    let h = harness(UNREACHABLE, true);
    let calls = AtomicUsize::new(0);

    let org_id = h
        .billing
        .create_organization("sess_success", &PendingLinkage::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(OrgId(11))
        })
        .await
        .unwrap();

    assert_eq!(org_id, OrgId(11));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let record = h.store.get(org_id).await.unwrap().expect("billing linked");
    assert_eq!(record.org_id, org_id);
    assert_eq!(record.checkout_session_id, "sess_success");
    assert!(record.subscription_id.is_empty());
}

#[tokio::test]
async fn test_pending_subscription_allows_creation() {
    let h = harness(UNREACHABLE, true);
    let pending = PendingLinkage {
        checkout_session_id: "cs_earlier".to_string(),
        subscription_id: "sub_earlier".to_string(),
        customer_id: "cus_earlier".to_string(),
        ..Default::default()
    };

    let org_id = h
        .billing
        .create_organization("", &pending, || async { Ok::<_, String>(OrgId(12)) })
        .await
        .unwrap();

    let record = h.store.get(org_id).await.unwrap().unwrap();
    assert_eq!(record.subscription_id, "sub_earlier");
    assert_eq!(record.customer_id, "cus_earlier");
    assert_eq!(record.checkout_session_id, "cs_earlier");
}

#[tokio::test]
async fn test_gate_disabled_allows_creation() {
    let h = harness(UNREACHABLE, false);
    assert!(!h.billing.is_billing_gate_enabled());

    let org_id = h
        .billing
        .create_organization("", &PendingLinkage::default(), || async {
            Ok::<_, String>(OrgId(13))
        })
        .await
        .unwrap();

    assert_eq!(org_id, OrgId(13));
    assert!(h.store.get(org_id).await.unwrap().is_none());
}

struct BrokenStore;

#[async_trait]
impl BillingStore for BrokenStore {
    async fn get(&self, _org_id: OrgId) -> BillingResult<Option<BillingRecord>> {
        Ok(None)
    }

    async fn upsert(&self, _record: &BillingRecord) -> BillingResult<()> {
        Err(BillingError::Storage("disk full".to_string()))
    }
}

#[tokio::test]
async fn test_linkage_failure_does_not_fail_creation() {
    let config = PaymentsConfig::new(UNREACHABLE, APP_URL).unwrap();
    let billing = BillingService::new(
        config,
        Arc::new(BrokenStore),
        Arc::new(InMemoryTeamDirectory::new()),
    )
    .unwrap();

    let org_id = billing
        .create_organization("cs_1", &PendingLinkage::default(), || async {
            Ok::<_, String>(OrgId(14))
        })
        .await
        .unwrap();

    assert_eq!(org_id, OrgId(14));
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn test_initiate_checkout_fills_pending_linkage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/billing/org/acme/checkout")
        .match_body(Matcher::Json(json!({
            "success_url": "https://git.example.com/org/create?checkout_session_id={CHECKOUT_SESSION_ID}&org_name=acme",
            "cancel_url": "https://git.example.com/org/create?org_name=acme",
        })))
        .with_status(200)
        .with_body(
            r#"{"checkout_url":"https://pay.example.com/c/cs_new","session_id":"cs_new","customer_id":"cus_new","subscription_id":"","expires_at":1700000000}"#,
        )
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let mut pending = PendingLinkage::default();
    let url = h
        .billing
        .initiate_checkout("acme", &mut pending)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(url, "https://pay.example.com/c/cs_new");
    assert_eq!(pending.checkout_session_id, "cs_new");
    assert_eq!(pending.checkout_url, url);
    assert_eq!(pending.customer_id, "cus_new");
    assert!(!pending.has_active_subscription());
}

#[tokio::test]
async fn test_initiate_checkout_failure_keeps_pending_linkage() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/billing/org/acme/checkout")
        .with_status(500)
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let mut pending = PendingLinkage {
        checkout_session_id: "cs_old".to_string(),
        ..Default::default()
    };
    let err = h
        .billing
        .initiate_checkout("acme", &mut pending)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Remote(_)));
    assert_eq!(pending.checkout_session_id, "cs_old");
}

#[tokio::test]
async fn test_paid_session_resumes_and_creates_org() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/billing/session/sess-paid")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"session_id":"sess-paid","status":"complete","payment_status":"paid","subscription_id":"sub_123","customer_id":"cus_123","expires_at":0}"#,
        )
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let mut pending = PendingLinkage::default();

    let resume = h
        .billing
        .resume_checkout(Some("sess-paid"), &mut pending)
        .await;
    mock.assert_async().await;

    assert!(resume.paid);
    assert_eq!(resume.state, CheckoutState::Paid);
    assert_eq!(resume.subscription_id, "sub_123");
    assert_eq!(resume.customer_id, "cus_123");
    assert_eq!(resume.billing_token, "sess-paid");
    assert!(resume.has_active_subscription);
    assert_eq!(pending.checkout_session_id, "sess-paid");
    assert_eq!(pending.subscription_id, "sub_123");

    let calls = AtomicUsize::new(0);
    let org_id = h
        .billing
        .create_organization(&resume.billing_token, &pending, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(OrgId(20))
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let record = h.store.get(org_id).await.unwrap().unwrap();
    assert_eq!(record.subscription_id, "sub_123");
    assert_eq!(record.customer_id, "cus_123");
    assert_eq!(record.checkout_session_id, "sess-paid");
}

#[tokio::test]
async fn test_unreachable_payments_service_is_not_paid() {
    let h = harness(UNREACHABLE, true);
    let mut pending = PendingLinkage {
        checkout_session_id: "cs_1".to_string(),
        ..Default::default()
    };

    let resume = h.billing.resume_checkout(None, &mut pending).await;

    assert!(!resume.paid);
    assert_eq!(resume.state, CheckoutState::Unpaid);
    assert!(!resume.status.is_empty());
    assert!(resume.billing_token.is_empty());
    assert!(h
        .billing
        .checkout
        .authorize_creation(&resume.billing_token, &pending)
        .is_err());
}

// ============================================================================
// Seat sync
// ============================================================================

#[tokio::test]
async fn test_sync_seats_updates_quantity_and_record() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/billing/subscription/sub_sync/quantity")
        .match_body(Matcher::Json(json!({ "quantity": 4 })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let org = seed_org3(&h.teams).await;
    subscribed_record(&h.store, org, 1).await;

    let outcome = h.billing.sync_seats(org).await.unwrap();
    mock.assert_async().await;

    assert_eq!(outcome.seat_count, 4);
    assert!(outcome.message().starts_with("Synced seats to"));

    let record = h.store.get(org).await.unwrap().unwrap();
    assert_eq!(record.last_seat_count, 4);
    assert_eq!(record.last_synced_at, Some(outcome.synced_at));
    assert_eq!(record.customer_id, "cus_sync");
}

#[tokio::test]
async fn test_rejected_sync_leaves_record_unchanged() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/billing/subscription/sub_sync/quantity")
        .with_status(400)
        .with_body(r#"{"error":"subscription canceled"}"#)
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let org = seed_org3(&h.teams).await;
    subscribed_record(&h.store, org, 1).await;
    let before = h.store.get(org).await.unwrap().unwrap();

    let err = h.billing.sync_seats(org).await.unwrap_err();
    assert!(matches!(err, BillingError::Remote(_)));

    let after = h.store.get(org).await.unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(after.last_seat_count, 1);
    assert!(after.last_synced_at.is_none());
}

#[tokio::test]
async fn test_sync_without_subscription_makes_no_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let org = seed_org3(&h.teams).await;
    h.store
        .upsert(&BillingRecord {
            customer_id: "cus_only".to_string(),
            ..BillingRecord::new(org)
        })
        .await
        .unwrap();

    let err = h.billing.sync_seats(org).await.unwrap_err();
    assert!(matches!(err, BillingError::NoSubscription));
    assert_eq!(err.user_message(), "No subscription found to sync seats");
    mock.assert_async().await;
}

// ============================================================================
// Portal and summary
// ============================================================================

#[tokio::test]
async fn test_portal_without_customer_makes_no_request() {
    let mut server = mockito::Server::new_async().await;
    let gets = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let posts = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    h.store
        .upsert(&BillingRecord {
            checkout_session_id: "cs_1".to_string(),
            ..BillingRecord::new(OrgId(30))
        })
        .await
        .unwrap();

    let err = h.billing.open_portal(OrgId(30), "acme").await.unwrap_err();
    assert!(matches!(err, BillingError::NoCustomer));
    assert_eq!(
        err.user_message(),
        "No billing customer found for this organization"
    );
    gets.assert_async().await;
    posts.assert_async().await;
}

#[tokio::test]
async fn test_portal_with_customer() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/billing/portal")
        .match_body(Matcher::Json(json!({
            "customer_id": "cus_sync",
            "subscription_id": "sub_sync",
            "return_url": "https://git.example.com/org/org3/settings",
        })))
        .with_status(200)
        .with_body(r#"{"portal_url":"https://pay.example.com/p/org3"}"#)
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    subscribed_record(&h.store, OrgId(3), 0).await;

    let url = h.billing.open_portal(OrgId(3), "org3").await.unwrap();
    mock.assert_async().await;
    assert_eq!(url, "https://pay.example.com/p/org3");
}

#[tokio::test]
async fn test_billing_summary_reports_stale_seats() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/billing/subscription/sub_sync")
        .with_status(200)
        .with_body(
            r#"{"id":"sub_sync","status":"active","quantity":1,"customer":"cus_sync","current_period_end":0}"#,
        )
        .create_async()
        .await;

    let h = harness(&server.url(), true);
    let org = seed_org3(&h.teams).await;
    subscribed_record(&h.store, org, 1).await;

    let summary = h.billing.billing_summary(org).await;
    assert!(summary.enabled);
    assert_eq!(summary.current_seat_count, Some(4));
    assert!(summary.seats_out_of_sync());
    assert!(summary.portal_available());
    assert_eq!(
        summary.subscription.as_ref().map(|s| s.status.as_str()),
        Some("active")
    );
}
