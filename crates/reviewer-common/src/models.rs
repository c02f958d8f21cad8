use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// Number of reviewers assigned to a freshly opened pull request.
pub const MAX_REVIEWERS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub team_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Snapshot of this user with the given activity flag.
    pub fn with_active(self, is_active: bool) -> Self {
        Self { is_active, ..self }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub team_name: String,
    pub members: Vec<User>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrStatus {
    Open,
    Merged,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl std::fmt::Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "MERGED" => Ok(Self::Merged),
            _ => Err(format!("Invalid pull request status: {}", s)),
        }
    }
}

/// A pull request snapshot.
///
/// Transitions never mutate in place: [`PullRequest::merged`] and
/// [`PullRequest::with_replaced_reviewer`] return the next snapshot with
/// `version` bumped, so the store can reject writes based on a stale read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PrStatus,
    pub assigned_reviewers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, owned by the store.
    #[serde(skip)]
    pub version: i64,
}

impl PullRequest {
    /// Build a new `OPEN` pull request, checking the reviewer-set invariants.
    pub fn open(
        pull_request_id: impl Into<String>,
        pull_request_name: impl Into<String>,
        author_id: impl Into<String>,
        assigned_reviewers: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ReviewError> {
        let author_id = author_id.into();
        validate_reviewers(&author_id, &assigned_reviewers)?;
        Ok(Self {
            pull_request_id: pull_request_id.into(),
            pull_request_name: pull_request_name.into(),
            author_id,
            status: PrStatus::Open,
            assigned_reviewers,
            created_at,
            merged_at: None,
            version: 0,
        })
    }

    pub fn is_merged(&self) -> bool {
        self.status == PrStatus::Merged
    }

    pub fn has_reviewer(&self, user_id: &str) -> bool {
        self.assigned_reviewers.iter().any(|r| r == user_id)
    }

    /// The `MERGED` successor of this snapshot. An already merged pull
    /// request is returned unchanged, keeping its original `merged_at`.
    pub fn merged(self, now: DateTime<Utc>) -> Self {
        if self.is_merged() {
            return self;
        }
        Self {
            status: PrStatus::Merged,
            merged_at: Some(now),
            version: self.version + 1,
            ..self
        }
    }

    /// The successor with the first occurrence of `old_reviewer` swapped for
    /// `new_reviewer`, keeping its position in the list.
    pub fn with_replaced_reviewer(
        &self,
        old_reviewer: &str,
        new_reviewer: &str,
    ) -> Result<Self, ReviewError> {
        if self.is_merged() {
            return Err(ReviewError::AlreadyMerged {
                pr_id: self.pull_request_id.clone(),
            });
        }
        let Some(index) = self
            .assigned_reviewers
            .iter()
            .position(|r| r == old_reviewer)
        else {
            return Err(ReviewError::ReviewerNotAssigned {
                pr_id: self.pull_request_id.clone(),
                reviewer_id: old_reviewer.to_string(),
            });
        };

        let mut reviewers = self.assigned_reviewers.clone();
        reviewers[index] = new_reviewer.to_string();
        validate_reviewers(&self.author_id, &reviewers)?;

        Ok(Self {
            assigned_reviewers: reviewers,
            version: self.version + 1,
            ..self.clone()
        })
    }
}

fn validate_reviewers(author_id: &str, reviewers: &[String]) -> Result<(), ReviewError> {
    if reviewers.len() > MAX_REVIEWERS {
        return Err(ReviewError::TooManyReviewers {
            max: MAX_REVIEWERS,
            given: reviewers.len(),
        });
    }
    if reviewers.iter().any(|r| r == author_id) {
        return Err(ReviewError::InvalidReviewers(format!(
            "author {} cannot review their own pull request",
            author_id
        )));
    }
    for (i, reviewer) in reviewers.iter().enumerate() {
        if reviewers[..i].contains(reviewer) {
            return Err(ReviewError::InvalidReviewers(format!(
                "reviewer {} assigned twice",
                reviewer
            )));
        }
    }
    Ok(())
}

/// Per-user assignment counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub user_id: String,
    pub username: String,
    pub total_assigned: u64,
    pub open_assigned: u64,
    pub merged_assigned: u64,
}

/// Service-wide pull request counts. `total_reviewers` counts assignments,
/// not distinct users.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrStats {
    pub total_prs: u64,
    pub open_prs: u64,
    pub merged_prs: u64,
    pub total_reviewers: u64,
}
