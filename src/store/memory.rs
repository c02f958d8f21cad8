//! In-memory implementation of the storage traits.
//!
//! All tables live behind one `RwLock`, so every multi-row write is atomic
//! with respect to readers. State is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reviewer_common::{PrStats, PrStatus, PullRequest, Team, User, UserStats};
use tokio::sync::RwLock;

use super::{PullRequestStore, StoreError, StoreResult, TeamStore, UserStore};

struct TeamRecord {
    created_at: DateTime<Utc>,
    /// Member ids in roster order. A user that later moved to another team
    /// stays listed here and is filtered out on read.
    member_ids: Vec<String>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    teams: HashMap<String, TeamRecord>,
    pull_requests: HashMap<String, PullRequest>,
}

impl Tables {
    fn members(&self, team_name: &str) -> Vec<User> {
        let Some(record) = self.teams.get(team_name) else {
            return Vec::new();
        };
        record
            .member_ids
            .iter()
            .filter_map(|id| self.users.get(id))
            .filter(|u| u.team_name == team_name)
            .cloned()
            .collect()
    }

    fn team(&self, team_name: &str) -> Option<Team> {
        let record = self.teams.get(team_name)?;
        Some(Team {
            team_name: team_name.to_string(),
            members: self.members(team_name),
            created_at: record.created_at,
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(user_id).cloned())
    }

    async fn users_by_team(&self, team_name: &str) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        Ok(tables.members(team_name))
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&user.user_id) {
            Some(stored) => {
                stored.username = user.username.clone();
                stored.team_name = user.team_name.clone();
                stored.is_active = user.is_active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn create_team(&self, team: &Team) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.teams.contains_key(&team.team_name) {
            return Err(StoreError::Duplicate {
                key: format!("team:{}", team.team_name),
            });
        }

        let mut member_ids = Vec::with_capacity(team.members.len());
        for member in &team.members {
            let user = User {
                team_name: team.team_name.clone(),
                ..member.clone()
            };
            match tables.users.get_mut(&user.user_id) {
                // Upsert keeps the original creation time.
                Some(existing) => {
                    existing.username = user.username;
                    existing.team_name = user.team_name;
                    existing.is_active = user.is_active;
                }
                None => {
                    tables.users.insert(user.user_id.clone(), user);
                }
            }
            if !member_ids.contains(&member.user_id) {
                member_ids.push(member.user_id.clone());
            }
        }

        tables.teams.insert(
            team.team_name.clone(),
            TeamRecord {
                created_at: team.created_at,
                member_ids,
            },
        );
        Ok(())
    }

    async fn get_team(&self, team_name: &str) -> StoreResult<Option<Team>> {
        let tables = self.tables.read().await;
        Ok(tables.team(team_name))
    }

    async fn team_exists(&self, team_name: &str) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.teams.contains_key(team_name))
    }

    async fn deactivate_team(&self, team_name: &str) -> StoreResult<Option<Team>> {
        let mut tables = self.tables.write().await;
        if !tables.teams.contains_key(team_name) {
            return Ok(None);
        }
        for user in tables.users.values_mut() {
            if user.team_name == team_name {
                user.is_active = false;
            }
        }
        Ok(tables.team(team_name))
    }
}

#[async_trait]
impl PullRequestStore for MemoryStore {
    async fn insert_pull_request(&self, pr: &PullRequest) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.pull_requests.contains_key(&pr.pull_request_id) {
            return Err(StoreError::Duplicate {
                key: format!("pull_request:{}", pr.pull_request_id),
            });
        }
        tables
            .pull_requests
            .insert(pr.pull_request_id.clone(), pr.clone());
        Ok(())
    }

    async fn get_pull_request(&self, pr_id: &str) -> StoreResult<Option<PullRequest>> {
        let tables = self.tables.read().await;
        Ok(tables.pull_requests.get(pr_id).cloned())
    }

    async fn pull_request_exists(&self, pr_id: &str) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.pull_requests.contains_key(pr_id))
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &PullRequest,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.pull_requests.get_mut(&next.pull_request_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = next.clone();
                Ok(())
            }
            _ => Err(StoreError::VersionConflict {
                key: format!("pull_request:{}", next.pull_request_id),
                expected: expected_version,
            }),
        }
    }

    async fn pull_requests_by_reviewer(&self, user_id: &str) -> StoreResult<Vec<PullRequest>> {
        let tables = self.tables.read().await;
        let mut prs: Vec<PullRequest> = tables
            .pull_requests
            .values()
            .filter(|pr| pr.has_reviewer(user_id))
            .cloned()
            .collect();
        prs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.pull_request_id.cmp(&b.pull_request_id))
        });
        Ok(prs)
    }

    async fn user_stats(&self) -> StoreResult<Vec<UserStats>> {
        let tables = self.tables.read().await;
        let mut stats: Vec<UserStats> = tables
            .users
            .values()
            .map(|user| {
                let mut row = UserStats {
                    user_id: user.user_id.clone(),
                    username: user.username.clone(),
                    total_assigned: 0,
                    open_assigned: 0,
                    merged_assigned: 0,
                };
                for pr in tables.pull_requests.values() {
                    if pr.has_reviewer(&user.user_id) {
                        row.total_assigned += 1;
                        match pr.status {
                            PrStatus::Open => row.open_assigned += 1,
                            PrStatus::Merged => row.merged_assigned += 1,
                        }
                    }
                }
                row
            })
            .collect();
        stats.sort_by(|a, b| {
            b.total_assigned
                .cmp(&a.total_assigned)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(stats)
    }

    async fn pr_stats(&self) -> StoreResult<PrStats> {
        let tables = self.tables.read().await;
        let mut stats = PrStats::default();
        for pr in tables.pull_requests.values() {
            stats.total_prs += 1;
            match pr.status {
                PrStatus::Open => stats.open_prs += 1,
                PrStatus::Merged => stats.merged_prs += 1,
            }
            stats.total_reviewers += pr.assigned_reviewers.len() as u64;
        }
        Ok(stats)
    }
}
