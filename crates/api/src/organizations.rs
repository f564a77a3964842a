//! Organization persistence
//!
//! Just enough organization handling to put the payment gate in front of creation: an
//! organization row, its owner team, and the creator's owner membership.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orgbill_billing::{InMemoryTeamDirectory, Team, OWNER_TEAM_NAME};
use orgbill_shared::{AccessMode, OrgId, TeamId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};

/// Who can see an organization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Limited,
    Private,
}

impl Visibility {
    pub fn level(&self) -> i16 {
        match self {
            Visibility::Public => 0,
            Visibility::Limited => 1,
            Visibility::Private => 2,
        }
    }

    pub fn from_level(level: i16) -> Self {
        match level {
            1 => Visibility::Limited,
            2 => Visibility::Private,
            _ => Visibility::Public,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub visibility: Visibility,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input for creating an organization
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub owner_id: UserId,
    pub visibility: Visibility,
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Create the organization with an owner team holding its creator.
    /// Names are unique case-insensitively.
    async fn create(&self, new_org: &NewOrganization) -> ApiResult<Organization>;

    async fn get(&self, org_id: OrgId) -> ApiResult<Option<Organization>>;
}

fn name_taken() -> ApiError {
    ApiError::Conflict("An organization with this name already exists".to_string())
}

/// PostgreSQL organization store
#[derive(Debug, Clone)]
pub struct PgOrganizations {
    pool: PgPool,
}

impl PgOrganizations {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationStore for PgOrganizations {
    async fn create(&self, new_org: &NewOrganization) -> ApiResult<Organization> {
        let lower_name = new_org.name.to_lowercase();

        // Check if name is already taken
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM organizations WHERE lower_name = $1")
                .bind(&lower_name)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(name_taken());
        }

        let mut tx = self.pool.begin().await?;

        let (org_id, created_at): (i64, OffsetDateTime) = sqlx::query_as(
            r#"
            INSERT INTO organizations (name, lower_name, visibility, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, created_at
            "#,
        )
        .bind(&new_org.name)
        .bind(&lower_name)
        .bind(new_org.visibility.level())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => name_taken(),
            other => other,
        })?;

        let (team_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO teams (org_id, name, authorize, can_create_org_repo)
            VALUES ($1, $2, $3, TRUE)
            RETURNING id
            "#,
        )
        .bind(org_id)
        .bind(OWNER_TEAM_NAME)
        .bind(AccessMode::Owner.level())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO team_users (org_id, team_id, uid)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(org_id)
        .bind(team_id)
        .bind(new_org.owner_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            org_id = org_id,
            name = %new_org.name,
            owner_id = %new_org.owner_id,
            "Created organization"
        );

        Ok(Organization {
            id: OrgId(org_id),
            name: new_org.name.clone(),
            visibility: new_org.visibility,
            created_at,
        })
    }

    async fn get(&self, org_id: OrgId) -> ApiResult<Option<Organization>> {
        let row: Option<(i64, String, i16, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT id, name, visibility, created_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, visibility, created_at)| Organization {
            id: OrgId(id),
            name,
            visibility: Visibility::from_level(visibility),
            created_at,
        }))
    }
}

/// In-memory organization store for development and tests.
///
/// Owner teams are registered in the given team directory so seat counting sees them.
#[derive(Debug)]
pub struct InMemoryOrganizations {
    orgs: RwLock<HashMap<OrgId, Organization>>,
    next_id: AtomicI64,
    teams: Arc<InMemoryTeamDirectory>,
}

impl InMemoryOrganizations {
    pub fn new(teams: Arc<InMemoryTeamDirectory>) -> Self {
        Self {
            orgs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            teams,
        }
    }
}

#[async_trait]
impl OrganizationStore for InMemoryOrganizations {
    async fn create(&self, new_org: &NewOrganization) -> ApiResult<Organization> {
        let lower_name = new_org.name.to_lowercase();
        let mut orgs = self.orgs.write().await;
        if orgs.values().any(|o| o.name.to_lowercase() == lower_name) {
            return Err(name_taken());
        }

        let id = OrgId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let org = Organization {
            id,
            name: new_org.name.clone(),
            visibility: new_org.visibility,
            created_at: OffsetDateTime::now_utc(),
        };
        orgs.insert(id, org.clone());

        self.teams
            .add_team(
                Team {
                    // One owner team per organization, so the org ID is a unique team ID
                    id: TeamId(id.0),
                    org_id: id,
                    name: OWNER_TEAM_NAME.to_string(),
                    access_mode: AccessMode::Owner,
                    can_create_org_repo: true,
                    units: Vec::new(),
                },
                vec![new_org.owner_id],
            )
            .await;

        Ok(org)
    }

    async fn get(&self, org_id: OrgId) -> ApiResult<Option<Organization>> {
        Ok(self.orgs.read().await.get(&org_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgbill_billing::TeamDirectory;

    fn new_org(name: &str) -> NewOrganization {
        NewOrganization {
            name: name.to_string(),
            owner_id: UserId(7),
            visibility: Visibility::Private,
        }
    }

    #[test]
    fn test_visibility_levels() {
        for v in [Visibility::Public, Visibility::Limited, Visibility::Private] {
            assert_eq!(Visibility::from_level(v.level()), v);
        }
        assert_eq!(Visibility::from_level(9), Visibility::Public);
    }

    #[tokio::test]
    async fn test_in_memory_create_registers_owner_team() {
        let teams = Arc::new(InMemoryTeamDirectory::new());
        let orgs = InMemoryOrganizations::new(teams.clone());

        let org = orgs.create(&new_org("Acme")).await.unwrap();
        assert_eq!(orgs.get(org.id).await.unwrap(), Some(org.clone()));

        let org_teams = teams.teams(org.id).await.unwrap();
        assert_eq!(org_teams.len(), 1);
        assert!(org_teams[0].is_owner_team());
        assert_eq!(
            teams.members(&org_teams[0]).await.unwrap(),
            vec![UserId(7)]
        );
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_create_then_get() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = orgbill_shared::create_pool(&url, 2).await.unwrap();
        orgbill_shared::run_migrations(&pool).await.unwrap();
        let orgs = PgOrganizations::new(pool.clone());

        let name = format!("pg-org-{}", OffsetDateTime::now_utc().unix_timestamp_nanos());
        let created = orgs.create(&new_org(&name)).await.unwrap();
        assert_eq!(created.visibility, Visibility::Private);

        let fetched = orgs.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(orgs.get(OrgId(i64::MAX)).await.unwrap().is_none());

        assert!(matches!(
            orgs.create(&new_org(&name.to_uppercase())).await,
            Err(ApiError::Conflict(_))
        ));

        // The owner team is visible to seat counting
        let teams = orgbill_billing::PgTeamDirectory::new(pool);
        let org_teams = teams.teams(created.id).await.unwrap();
        assert_eq!(org_teams.len(), 1);
        assert!(org_teams[0].is_owner_team());
        assert_eq!(teams.members(&org_teams[0]).await.unwrap(), vec![UserId(7)]);
    }

    #[tokio::test]
    async fn test_in_memory_names_are_unique_ignoring_case() {
        let orgs = InMemoryOrganizations::new(Arc::new(InMemoryTeamDirectory::new()));
        orgs.create(&new_org("Acme")).await.unwrap();
        assert!(matches!(
            orgs.create(&new_org("acme")).await,
            Err(ApiError::Conflict(_))
        ));
    }
}
