use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reviewer_common::{PrStats, PrStatus, PullRequest, Team, User, UserStats};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::{PullRequestStore, StoreError, StoreResult, TeamStore, UserStore};

/// Async-safe handle to the review database.
///
/// Wraps `ReviewDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads. The mutex also serializes writers,
/// which is what makes each multi-statement operation atomic.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ReviewDb>>,
}

impl DbHandle {
    pub fn new(db: ReviewDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut ReviewDb) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
            f(&mut *guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct ReviewDb {
    conn: Connection,
}

impl ReviewDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS teams (
                    team_name TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    user_id TEXT PRIMARY KEY,
                    username TEXT NOT NULL,
                    team_name TEXT NOT NULL REFERENCES teams(team_name),
                    team_position INTEGER NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pull_requests (
                    pull_request_id TEXT PRIMARY KEY,
                    pull_request_name TEXT NOT NULL,
                    author_id TEXT NOT NULL REFERENCES users(user_id),
                    status TEXT NOT NULL DEFAULT 'OPEN',
                    created_at TEXT NOT NULL,
                    merged_at TEXT,
                    version INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS pr_reviewers (
                    pull_request_id TEXT NOT NULL REFERENCES pull_requests(pull_request_id) ON DELETE CASCADE,
                    reviewer_id TEXT NOT NULL REFERENCES users(user_id),
                    position INTEGER NOT NULL,
                    PRIMARY KEY (pull_request_id, reviewer_id)
                );

                CREATE INDEX IF NOT EXISTS idx_users_team ON users(team_name);
                CREATE INDEX IF NOT EXISTS idx_pr_reviewers_reviewer ON pr_reviewers(reviewer_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id, username, team_name, is_active, created_at FROM users WHERE user_id = ?1",
                params![user_id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")?;
        Ok(user)
    }

    pub fn users_by_team(&self, team_name: &str) -> StoreResult<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, username, team_name, is_active, created_at
                 FROM users WHERE team_name = ?1 ORDER BY team_position, user_id",
            )
            .context("Failed to prepare users_by_team")?;
        let rows = stmt
            .query_map(params![team_name], user_from_row)
            .context("Failed to query team members")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?);
        }
        Ok(users)
    }

    pub fn update_user(&self, user: &User) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET username = ?1, team_name = ?2, is_active = ?3 WHERE user_id = ?4",
                params![user.username, user.team_name, user.is_active, user.user_id],
            )
            .context("Failed to update user")?;
        Ok(changed > 0)
    }

    // ── Teams ─────────────────────────────────────────────────────────

    pub fn create_team(&mut self, team: &Team) -> StoreResult<()> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO teams (team_name, created_at) VALUES (?1, ?2)",
            params![team.team_name, team.created_at],
        )
        .map_err(|e| duplicate_or(e, format!("team:{}", team.team_name), "Failed to insert team"))?;

        for (position, member) in team.members.iter().enumerate() {
            tx.execute(
                "INSERT INTO users (user_id, username, team_name, team_position, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id) DO UPDATE SET
                    username = excluded.username,
                    team_name = excluded.team_name,
                    team_position = excluded.team_position,
                    is_active = excluded.is_active",
                params![
                    member.user_id,
                    member.username,
                    team.team_name,
                    position as i64,
                    member.is_active,
                    member.created_at,
                ],
            )
            .context("Failed to upsert team member")?;
        }
        tx.commit().context("Failed to commit team")?;
        Ok(())
    }

    pub fn get_team(&self, team_name: &str) -> StoreResult<Option<Team>> {
        let created_at: Option<DateTime<Utc>> = self
            .conn
            .query_row(
                "SELECT created_at FROM teams WHERE team_name = ?1",
                params![team_name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query team")?;
        let Some(created_at) = created_at else {
            return Ok(None);
        };
        Ok(Some(Team {
            team_name: team_name.to_string(),
            members: self.users_by_team(team_name)?,
            created_at,
        }))
    }

    pub fn team_exists(&self, team_name: &str) -> StoreResult<bool> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM teams WHERE team_name = ?1)",
                params![team_name],
                |row| row.get(0),
            )
            .context("Failed to check team existence")?;
        Ok(exists)
    }

    pub fn deactivate_team(&self, team_name: &str) -> StoreResult<Option<Team>> {
        if !self.team_exists(team_name)? {
            return Ok(None);
        }
        self.conn
            .execute(
                "UPDATE users SET is_active = 0 WHERE team_name = ?1",
                params![team_name],
            )
            .context("Failed to deactivate team members")?;
        self.get_team(team_name)
    }

    // ── Pull requests ─────────────────────────────────────────────────

    pub fn insert_pull_request(&mut self, pr: &PullRequest) -> StoreResult<()> {
        let key = format!("pull_request:{}", pr.pull_request_id);
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO pull_requests (pull_request_id, pull_request_name, author_id, status, created_at, merged_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                pr.pull_request_id,
                pr.pull_request_name,
                pr.author_id,
                pr.status.as_str(),
                pr.created_at,
                pr.merged_at,
                pr.version,
            ],
        )
        .map_err(|e| duplicate_or(e, key, "Failed to insert pull request"))?;
        write_reviewers(&tx, pr)?;
        tx.commit().context("Failed to commit pull request")?;
        Ok(())
    }

    pub fn get_pull_request(&self, pr_id: &str) -> StoreResult<Option<PullRequest>> {
        let row = self
            .conn
            .query_row(
                "SELECT pull_request_id, pull_request_name, author_id, status, created_at, merged_at, version
                 FROM pull_requests WHERE pull_request_id = ?1",
                params![pr_id],
                pr_row,
            )
            .optional()
            .context("Failed to query pull request")?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row)?)),
            None => Ok(None),
        }
    }

    pub fn pull_request_exists(&self, pr_id: &str) -> StoreResult<bool> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM pull_requests WHERE pull_request_id = ?1)",
                params![pr_id],
                |row| row.get(0),
            )
            .context("Failed to check pull request existence")?;
        Ok(exists)
    }

    pub fn compare_and_swap(&mut self, expected_version: i64, next: &PullRequest) -> StoreResult<()> {
        let tx = self.conn.transaction().context("Failed to begin transaction")?;
        let changed = tx
            .execute(
                "UPDATE pull_requests SET status = ?1, merged_at = ?2, version = ?3
                 WHERE pull_request_id = ?4 AND version = ?5",
                params![
                    next.status.as_str(),
                    next.merged_at,
                    next.version,
                    next.pull_request_id,
                    expected_version,
                ],
            )
            .context("Failed to update pull request")?;
        if changed == 0 {
            return Err(StoreError::VersionConflict {
                key: format!("pull_request:{}", next.pull_request_id),
                expected: expected_version,
            });
        }
        tx.execute(
            "DELETE FROM pr_reviewers WHERE pull_request_id = ?1",
            params![next.pull_request_id],
        )
        .context("Failed to clear reviewers")?;
        write_reviewers(&tx, next)?;
        tx.commit().context("Failed to commit pull request update")?;
        Ok(())
    }

    pub fn pull_requests_by_reviewer(&self, user_id: &str) -> StoreResult<Vec<PullRequest>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.pull_request_id, p.pull_request_name, p.author_id, p.status, p.created_at, p.merged_at, p.version
                 FROM pull_requests p
                 JOIN pr_reviewers r ON p.pull_request_id = r.pull_request_id
                 WHERE r.reviewer_id = ?1
                 ORDER BY p.created_at, p.pull_request_id",
            )
            .context("Failed to prepare pull_requests_by_reviewer")?;
        let rows = stmt
            .query_map(params![user_id], pr_row)
            .context("Failed to query reviewer pull requests")?;
        let mut prs = Vec::new();
        for row in rows {
            let row = row.context("Failed to read pull request row")?;
            prs.push(self.hydrate(row)?);
        }
        Ok(prs)
    }

    pub fn user_stats(&self) -> StoreResult<Vec<UserStats>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT
                    u.user_id,
                    u.username,
                    COUNT(r.pull_request_id) AS total_assigned,
                    COUNT(CASE WHEN p.status = 'OPEN' THEN 1 END) AS open_assigned,
                    COUNT(CASE WHEN p.status = 'MERGED' THEN 1 END) AS merged_assigned
                 FROM users u
                 LEFT JOIN pr_reviewers r ON u.user_id = r.reviewer_id
                 LEFT JOIN pull_requests p ON r.pull_request_id = p.pull_request_id
                 GROUP BY u.user_id, u.username
                 ORDER BY total_assigned DESC, u.user_id",
            )
            .context("Failed to prepare user_stats")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserStats {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    total_assigned: row.get::<_, i64>(2)? as u64,
                    open_assigned: row.get::<_, i64>(3)? as u64,
                    merged_assigned: row.get::<_, i64>(4)? as u64,
                })
            })
            .context("Failed to query user stats")?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row.context("Failed to read user stats row")?);
        }
        Ok(stats)
    }

    pub fn pr_stats(&self) -> StoreResult<PrStats> {
        let stats = self
            .conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COUNT(CASE WHEN status = 'OPEN' THEN 1 END),
                    COUNT(CASE WHEN status = 'MERGED' THEN 1 END),
                    (SELECT COUNT(*) FROM pr_reviewers)
                 FROM pull_requests",
                [],
                |row| {
                    Ok(PrStats {
                        total_prs: row.get::<_, i64>(0)? as u64,
                        open_prs: row.get::<_, i64>(1)? as u64,
                        merged_prs: row.get::<_, i64>(2)? as u64,
                        total_reviewers: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .context("Failed to query pull request stats")?;
        Ok(stats)
    }

    fn reviewers_of(&self, pr_id: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT reviewer_id FROM pr_reviewers WHERE pull_request_id = ?1 ORDER BY position",
            )
            .context("Failed to prepare reviewers_of")?;
        let rows = stmt
            .query_map(params![pr_id], |row| row.get(0))
            .context("Failed to query reviewers")?;
        let mut reviewers = Vec::new();
        for row in rows {
            reviewers.push(row.context("Failed to read reviewer row")?);
        }
        Ok(reviewers)
    }

    fn hydrate(&self, row: PullRequestRow) -> StoreResult<PullRequest> {
        let assigned_reviewers = self.reviewers_of(&row.pull_request_id)?;
        let status = PrStatus::from_str(&row.status).map_err(|e| anyhow!(e))?;
        Ok(PullRequest {
            pull_request_id: row.pull_request_id,
            pull_request_name: row.pull_request_name,
            author_id: row.author_id,
            status,
            assigned_reviewers,
            created_at: row.created_at,
            merged_at: row.merged_at,
            version: row.version,
        })
    }
}

struct PullRequestRow {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: String,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    version: i64,
}

fn pr_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PullRequestRow> {
    Ok(PullRequestRow {
        pull_request_id: row.get(0)?,
        pull_request_name: row.get(1)?,
        author_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        merged_at: row.get(5)?,
        version: row.get(6)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        team_name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn write_reviewers(tx: &Transaction<'_>, pr: &PullRequest) -> StoreResult<()> {
    for (position, reviewer_id) in pr.assigned_reviewers.iter().enumerate() {
        tx.execute(
            "INSERT INTO pr_reviewers (pull_request_id, reviewer_id, position) VALUES (?1, ?2, ?3)",
            params![pr.pull_request_id, reviewer_id, position as i64],
        )
        .context("Failed to insert reviewer")?;
    }
    Ok(())
}

/// Map a primary-key or unique violation to `StoreError::Duplicate`.
fn duplicate_or(err: rusqlite::Error, key: String, context: &'static str) -> StoreError {
    let duplicate = matches!(
        &err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    );
    if duplicate {
        StoreError::Duplicate { key }
    } else {
        StoreError::Backend(anyhow::Error::new(err).context(context))
    }
}

/// [`DbHandle`] exposed through the storage traits.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    pub fn new(db: ReviewDb) -> Self {
        Self {
            db: DbHandle::new(db),
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(ReviewDb::new(path)?))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(ReviewDb::new_in_memory()?))
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let user_id = user_id.to_string();
        self.db.call(move |db| db.get_user(&user_id)).await
    }

    async fn users_by_team(&self, team_name: &str) -> StoreResult<Vec<User>> {
        let team_name = team_name.to_string();
        self.db.call(move |db| db.users_by_team(&team_name)).await
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let user = user.clone();
        self.db.call(move |db| db.update_user(&user)).await
    }
}

#[async_trait]
impl TeamStore for SqliteStore {
    async fn create_team(&self, team: &Team) -> StoreResult<()> {
        let team = team.clone();
        self.db.call(move |db| db.create_team(&team)).await
    }

    async fn get_team(&self, team_name: &str) -> StoreResult<Option<Team>> {
        let team_name = team_name.to_string();
        self.db.call(move |db| db.get_team(&team_name)).await
    }

    async fn team_exists(&self, team_name: &str) -> StoreResult<bool> {
        let team_name = team_name.to_string();
        self.db.call(move |db| db.team_exists(&team_name)).await
    }

    async fn deactivate_team(&self, team_name: &str) -> StoreResult<Option<Team>> {
        let team_name = team_name.to_string();
        self.db.call(move |db| db.deactivate_team(&team_name)).await
    }
}

#[async_trait]
impl PullRequestStore for SqliteStore {
    async fn insert_pull_request(&self, pr: &PullRequest) -> StoreResult<()> {
        let pr = pr.clone();
        self.db.call(move |db| db.insert_pull_request(&pr)).await
    }

    async fn get_pull_request(&self, pr_id: &str) -> StoreResult<Option<PullRequest>> {
        let pr_id = pr_id.to_string();
        self.db.call(move |db| db.get_pull_request(&pr_id)).await
    }

    async fn pull_request_exists(&self, pr_id: &str) -> StoreResult<bool> {
        let pr_id = pr_id.to_string();
        self.db.call(move |db| db.pull_request_exists(&pr_id)).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &PullRequest,
    ) -> StoreResult<()> {
        let next = next.clone();
        self.db
            .call(move |db| db.compare_and_swap(expected_version, &next))
            .await
    }

    async fn pull_requests_by_reviewer(&self, user_id: &str) -> StoreResult<Vec<PullRequest>> {
        let user_id = user_id.to_string();
        self.db
            .call(move |db| db.pull_requests_by_reviewer(&user_id))
            .await
    }

    async fn user_stats(&self) -> StoreResult<Vec<UserStats>> {
        self.db.call(|db| db.user_stats()).await
    }

    async fn pr_stats(&self) -> StoreResult<PrStats> {
        self.db.call(|db| db.pr_stats()).await
    }
}
