//! Shared application state

use std::sync::Arc;

use orgbill_billing::BillingService;
use sqlx::PgPool;

use crate::config::Config;
use crate::organizations::{OrganizationStore, PgOrganizations};

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub billing: BillingService,
    pub orgs: Arc<dyn OrganizationStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: PgPool,
        billing: BillingService,
        orgs: Arc<dyn OrganizationStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            billing,
            orgs,
        }
    }

    /// Everything backed by the given PostgreSQL pool
    pub fn with_postgres(config: Config, pool: PgPool) -> orgbill_billing::BillingResult<Self> {
        let billing = BillingService::with_postgres(config.payments.clone(), pool.clone())?;
        let orgs = Arc::new(PgOrganizations::new(pool.clone()));
        Ok(Self::new(config, pool, billing, orgs))
    }
}
