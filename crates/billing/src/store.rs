//! Per-organization billing record persistence
//!
//! One `BillingRecord` per organization, written through a single atomic insert-or-update
//! so concurrent first-time writers for the same organization never collide.

use std::collections::HashMap;

use async_trait::async_trait;
use orgbill_shared::OrgId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{BillingError, BillingResult};

/// Durable billing linkage for one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub org_id: OrgId,
    /// Empty until the organization has subscribed
    pub subscription_id: String,
    pub customer_id: String,
    /// Last known in-flight or completed checkout
    pub checkout_session_id: String,
    /// Count most recently accepted by the payments service
    pub last_seat_count: u32,
    /// `None` until the first successful seat sync
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_synced_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl BillingRecord {
    /// Empty record for an organization; timestamps are replaced by the store on write
    pub fn new(org_id: OrgId) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            org_id,
            subscription_id: String::new(),
            customer_id: String::new(),
            checkout_session_id: String::new(),
            last_seat_count: 0,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_subscription(&self) -> bool {
        !self.subscription_id.is_empty()
    }

    pub fn has_customer(&self) -> bool {
        !self.customer_id.is_empty()
    }

    /// Compare every caller-controlled field, ignoring server-managed timestamps
    pub fn same_billing_state(&self, other: &BillingRecord) -> bool {
        self.org_id == other.org_id
            && self.subscription_id == other.subscription_id
            && self.customer_id == other.customer_id
            && self.checkout_session_id == other.checkout_session_id
            && self.last_seat_count == other.last_seat_count
            && self.last_synced_at == other.last_synced_at
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for BillingRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let last_seat_count: i32 = row.try_get("last_seat_count")?;
        Ok(Self {
            org_id: OrgId(row.try_get("org_id")?),
            subscription_id: row.try_get("subscription_id")?,
            customer_id: row.try_get("customer_id")?,
            checkout_session_id: row.try_get("checkout_session_id")?,
            // CHECK constraint keeps this non-negative
            last_seat_count: u32::try_from(last_seat_count).unwrap_or(0),
            last_synced_at: row.try_get("last_synced_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Storage backend for billing records
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Load the record for an organization. `Ok(None)` when it has none.
    async fn get(&self, org_id: OrgId) -> BillingResult<Option<BillingRecord>>;

    /// Insert or update the record keyed by `record.org_id`.
    ///
    /// A zero org ID is silently ignored. Only the mutable billing fields are written;
    /// `created_at` and `updated_at` are assigned by the store.
    async fn upsert(&self, record: &BillingRecord) -> BillingResult<()>;
}

/// PostgreSQL-backed billing store over the `org_billing` table
#[derive(Debug, Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn get(&self, org_id: OrgId) -> BillingResult<Option<BillingRecord>> {
        let record = sqlx::query_as::<_, BillingRecord>(
            r#"
            SELECT org_id, subscription_id, customer_id, checkout_session_id,
                   last_seat_count, last_synced_at, created_at, updated_at
            FROM org_billing
            WHERE org_id = $1
            "#,
        )
        .bind(org_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert(&self, record: &BillingRecord) -> BillingResult<()> {
        if record.org_id.is_zero() {
            return Ok(());
        }

        let seat_count = i32::try_from(record.last_seat_count).map_err(|_| {
            BillingError::InvalidInput(format!(
                "seat count {} is out of range",
                record.last_seat_count
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO org_billing (
                org_id, subscription_id, customer_id, checkout_session_id,
                last_seat_count, last_synced_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (org_id) DO UPDATE SET
                subscription_id = EXCLUDED.subscription_id,
                customer_id = EXCLUDED.customer_id,
                checkout_session_id = EXCLUDED.checkout_session_id,
                last_seat_count = EXCLUDED.last_seat_count,
                last_synced_at = EXCLUDED.last_synced_at,
                updated_at = NOW()
            "#,
        )
        .bind(record.org_id.0)
        .bind(&record.subscription_id)
        .bind(&record.customer_id)
        .bind(&record.checkout_session_id)
        .bind(seat_count)
        .bind(record.last_synced_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            org_id = %record.org_id,
            subscription_id = %record.subscription_id,
            seat_count = record.last_seat_count,
            "Upserted billing record"
        );

        Ok(())
    }
}

/// In-memory billing store for development and tests
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    records: RwLock<HashMap<OrgId, BillingRecord>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn get(&self, org_id: OrgId) -> BillingResult<Option<BillingRecord>> {
        Ok(self.records.read().await.get(&org_id).cloned())
    }

    async fn upsert(&self, record: &BillingRecord) -> BillingResult<()> {
        if record.org_id.is_zero() {
            return Ok(());
        }

        let now = OffsetDateTime::now_utc();
        let mut records = self.records.write().await;
        let created_at = records
            .get(&record.org_id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        records.insert(
            record.org_id,
            BillingRecord {
                created_at,
                updated_at: now,
                ..record.clone()
            },
        );

        Ok(())
    }
}
