//! Team and membership lookup

use std::collections::HashMap;

use async_trait::async_trait;
use orgbill_shared::{AccessMode, OrgId, TeamId, UnitType, UserId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::{BillingError, BillingResult};

/// Name of the team every organization is created with
pub const OWNER_TEAM_NAME: &str = "Owners";

/// Access a team holds on one capability unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamUnit {
    pub unit: UnitType,
    pub access_mode: AccessMode,
}

/// An organization team with its access settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub org_id: OrgId,
    pub name: String,
    /// Organization-wide access level
    pub access_mode: AccessMode,
    pub can_create_org_repo: bool,
    #[serde(default)]
    pub units: Vec<TeamUnit>,
}

impl Team {
    pub fn is_owner_team(&self) -> bool {
        self.name == OWNER_TEAM_NAME
    }

    /// Highest access the team holds on a unit; `None` when the unit is not granted
    pub fn unit_access_mode(&self, unit: UnitType) -> AccessMode {
        self.units
            .iter()
            .filter(|u| u.unit == unit)
            .map(|u| u.access_mode)
            .max()
            .unwrap_or_default()
    }

    /// Whether members of this team occupy a billable seat
    pub fn grants_seat(&self) -> bool {
        self.is_owner_team()
            || self.can_create_org_repo
            || self.access_mode.can_write()
            || self.unit_access_mode(UnitType::Code).can_write()
    }
}

/// Source of teams and team members for an organization
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    /// All teams of an organization, with their unit grants
    async fn teams(&self, org_id: OrgId) -> BillingResult<Vec<Team>>;

    /// User IDs of a team's members
    async fn members(&self, team: &Team) -> BillingResult<Vec<UserId>>;
}

fn lookup_error(err: sqlx::Error) -> BillingError {
    BillingError::Lookup(err.to_string())
}

/// PostgreSQL team directory over `teams`, `team_units` and `team_users`
#[derive(Debug, Clone)]
pub struct PgTeamDirectory {
    pool: PgPool,
}

impl PgTeamDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TeamDirectory for PgTeamDirectory {
    async fn teams(&self, org_id: OrgId) -> BillingResult<Vec<Team>> {
        let rows: Vec<(i64, String, i16, bool)> = sqlx::query_as(
            r#"
            SELECT id, name, authorize, can_create_org_repo
            FROM teams
            WHERE org_id = $1
            ORDER BY id
            "#,
        )
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(lookup_error)?;

        let unit_rows: Vec<(i64, i32, i16)> = sqlx::query_as(
            r#"
            SELECT team_id, type, access_mode
            FROM team_units
            WHERE org_id = $1
            "#,
        )
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(lookup_error)?;

        let mut units: HashMap<i64, Vec<TeamUnit>> = HashMap::new();
        for (team_id, code, level) in unit_rows {
            // Unit types this engine does not know about cannot grant a seat
            if let Some(unit) = UnitType::from_code(code) {
                units.entry(team_id).or_default().push(TeamUnit {
                    unit,
                    access_mode: AccessMode::from_level(level),
                });
            }
        }

        Ok(rows
            .into_iter()
            .map(|(id, name, authorize, can_create_org_repo)| Team {
                id: TeamId(id),
                org_id,
                name,
                access_mode: AccessMode::from_level(authorize),
                can_create_org_repo,
                units: units.remove(&id).unwrap_or_default(),
            })
            .collect())
    }

    async fn members(&self, team: &Team) -> BillingResult<Vec<UserId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT uid
            FROM team_users
            WHERE team_id = $1
            "#,
        )
        .bind(team.id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(lookup_error)?;

        Ok(rows.into_iter().map(|(uid,)| UserId(uid)).collect())
    }
}

/// In-memory team directory for development and tests
#[derive(Debug, Default)]
pub struct InMemoryTeamDirectory {
    teams: RwLock<HashMap<OrgId, Vec<Team>>>,
    members: RwLock<HashMap<TeamId, Vec<UserId>>>,
}

impl InMemoryTeamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a team (replacing one with the same ID) and set its members
    pub async fn add_team(&self, team: Team, members: Vec<UserId>) {
        self.members.write().await.insert(team.id, members);

        let mut teams = self.teams.write().await;
        let org_teams = teams.entry(team.org_id).or_default();
        org_teams.retain(|t| t.id != team.id);
        org_teams.push(team);
    }
}

#[async_trait]
impl TeamDirectory for InMemoryTeamDirectory {
    async fn teams(&self, org_id: OrgId) -> BillingResult<Vec<Team>> {
        Ok(self
            .teams
            .read()
            .await
            .get(&org_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn members(&self, team: &Team) -> BillingResult<Vec<UserId>> {
        self.members
            .read()
            .await
            .get(&team.id)
            .cloned()
            .ok_or_else(|| BillingError::Lookup(format!("team {} not found", team.id)))
    }
}
