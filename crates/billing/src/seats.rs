//! Billable seat calculation
//!
//! A seat is one distinct user who can write code in the organization. Seats are derived
//! from current team membership on every call and never cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use orgbill_shared::{OrgId, UserId};
use serde::Serialize;

use crate::error::BillingResult;
use crate::teams::TeamDirectory;

/// Distinct users holding a billable seat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeatSet {
    members: BTreeSet<UserId>,
}

impl SeatSet {
    pub fn count(&self) -> u32 {
        u32::try_from(self.members.len()).unwrap_or(u32::MAX)
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member IDs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.members.iter()
    }
}

impl FromIterator<UserId> for SeatSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

/// Computes seat sets from a team directory
#[derive(Clone)]
pub struct SeatCalculator {
    teams: Arc<dyn TeamDirectory>,
}

impl SeatCalculator {
    pub fn new(teams: Arc<dyn TeamDirectory>) -> Self {
        Self { teams }
    }

    /// Collect every member of every seat-granting team.
    ///
    /// Any lookup failure aborts the whole computation; no partial set is returned.
    pub async fn compute_write_member_ids(&self, org_id: OrgId) -> BillingResult<SeatSet> {
        let teams = self.teams.teams(org_id).await?;

        let mut members = BTreeSet::new();
        for team in teams.iter().filter(|t| t.grants_seat()) {
            members.extend(self.teams.members(team).await?);
        }

        let seats = SeatSet { members };
        tracing::debug!(
            org_id = %org_id,
            teams = teams.len(),
            seats = seats.count(),
            "Computed seat set"
        );

        Ok(seats)
    }
}
