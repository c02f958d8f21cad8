//! Storage abstraction consumed by the services.
//!
//! Each entity gets a narrow capability trait so a service only sees the
//! operations it needs. Two backends implement all three:
//!
//! | Backend        | Module   | Used by                                   |
//! |----------------|----------|-------------------------------------------|
//! | `MemoryStore`  | `memory` | tests, `serve --in-memory`                |
//! | `SqliteStore`  | `sqlite` | the server (file-backed SQLite)           |
//!
//! Concurrent writers to the same pull request are serialized with an
//! optimistic version counter: [`PullRequestStore::compare_and_swap`]
//! only writes when the stored version still matches the caller's read.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{DbHandle, ReviewDb, SqliteStore};

use async_trait::async_trait;
use reviewer_common::{PrStats, PullRequest, Team, User, UserStats};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {key}")]
    Duplicate { key: String },

    #[error("stale write for {key}: expected version {expected}")]
    VersionConflict { key: String, expected: i64 },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Members of a team, in the order they were listed at team creation.
    async fn users_by_team(&self, team_name: &str) -> StoreResult<Vec<User>>;

    /// Overwrite a user's mutable fields. Returns `false` if no such user.
    async fn update_user(&self, user: &User) -> StoreResult<bool>;
}

#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Insert the team and upsert its members in one atomic step.
    /// A taken team name yields [`StoreError::Duplicate`].
    async fn create_team(&self, team: &Team) -> StoreResult<()>;

    async fn get_team(&self, team_name: &str) -> StoreResult<Option<Team>>;

    async fn team_exists(&self, team_name: &str) -> StoreResult<bool>;

    /// Mark every member inactive. Returns the updated team, or `None` if
    /// the team does not exist.
    async fn deactivate_team(&self, team_name: &str) -> StoreResult<Option<Team>>;
}

#[async_trait]
pub trait PullRequestStore: Send + Sync {
    /// Insert the pull request and its reviewer rows atomically.
    /// A taken id yields [`StoreError::Duplicate`].
    async fn insert_pull_request(&self, pr: &PullRequest) -> StoreResult<()>;

    async fn get_pull_request(&self, pr_id: &str) -> StoreResult<Option<PullRequest>>;

    async fn pull_request_exists(&self, pr_id: &str) -> StoreResult<bool>;

    /// Replace the stored pull request with `next` if its stored version is
    /// still `expected_version`; otherwise [`StoreError::VersionConflict`].
    async fn compare_and_swap(&self, expected_version: i64, next: &PullRequest)
    -> StoreResult<()>;

    async fn pull_requests_by_reviewer(&self, user_id: &str) -> StoreResult<Vec<PullRequest>>;

    /// One row per user, busiest reviewers first.
    async fn user_stats(&self) -> StoreResult<Vec<UserStats>>;

    async fn pr_stats(&self) -> StoreResult<PrStats>;
}

/// Everything the services need from a backend.
pub trait Store: UserStore + TeamStore + PullRequestStore {}

impl<T: UserStore + TeamStore + PullRequestStore> Store for T {}
