use std::sync::Arc;

use chrono::Utc;
use reviewer_common::{Entity, ReviewError, Team, User};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Boundary;
use crate::store::{Store, StoreError};

/// A roster entry as supplied when a team is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct TeamService {
    store: Arc<dyn Store>,
}

impl TeamService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a team. Listed users that already exist are moved into it and
    /// take the supplied name and active flag.
    pub async fn create_team(
        &self,
        team_name: &str,
        members: Vec<TeamMember>,
        cancel: &CancellationToken,
    ) -> Result<Team, ReviewError> {
        let io = Boundary::new(cancel, "TeamService::create_team");

        if io.read(self.store.team_exists(team_name)).await? {
            return Err(ReviewError::already_exists(Entity::Team, team_name));
        }

        let now = Utc::now();
        let team = Team {
            team_name: team_name.to_string(),
            members: members
                .into_iter()
                .map(|m| User {
                    user_id: m.user_id,
                    username: m.username,
                    team_name: team_name.to_string(),
                    is_active: m.is_active,
                    created_at: now,
                })
                .collect(),
            created_at: now,
        };

        match io.write(self.store.create_team(&team)).await? {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                return Err(ReviewError::already_exists(Entity::Team, team_name));
            }
            Err(e) => return Err(io.internal(e)),
        }

        info!(team_name, members = team.members.len(), "team created");
        // Re-read so upserted members report their stored creation time.
        Ok(io
            .after_commit(self.store.get_team(team_name))
            .await?
            .unwrap_or(team))
    }

    pub async fn get_team(
        &self,
        team_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Team, ReviewError> {
        let io = Boundary::new(cancel, "TeamService::get_team");
        io.read(self.store.get_team(team_name))
            .await?
            .ok_or_else(|| ReviewError::not_found(Entity::Team, team_name))
    }

    /// Mark every member of the team inactive.
    pub async fn deactivate_team(
        &self,
        team_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Team, ReviewError> {
        let io = Boundary::new(cancel, "TeamService::deactivate_team");
        let team = io
            .write(self.store.deactivate_team(team_name))
            .await?
            .map_err(|e| io.internal(e))?
            .ok_or_else(|| ReviewError::not_found(Entity::Team, team_name))?;
        info!(team_name, "team deactivated");
        Ok(team)
    }
}
