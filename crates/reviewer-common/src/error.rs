//! Typed error hierarchy for reviewer assignment.
//!
//! Every variant is a distinct, inspectable kind; the HTTP boundary maps
//! each one to a status code and the machine-readable [`ReviewError::code`].

use thiserror::Error;

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Team,
    User,
    PullRequest,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::User => "user",
            Self::PullRequest => "pull request",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from team, user and pull-request operations.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: Entity, id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },

    #[error("pull request {pr_id} is already merged")]
    AlreadyMerged { pr_id: String },

    #[error("reviewer {reviewer_id} is not assigned to pull request {pr_id}")]
    ReviewerNotAssigned { pr_id: String, reviewer_id: String },

    #[error("no candidate reviewers available")]
    NoCandidates,

    #[error("maximum {max} reviewers allowed, got {given}")]
    TooManyReviewers { max: usize, given: usize },

    #[error("invalid reviewer list: {0}")]
    InvalidReviewers(String),

    #[error("pull request {pr_id} was modified concurrently")]
    Conflict { pr_id: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} failed: {source}")]
    Internal {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ReviewError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: Entity, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    pub fn internal(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            operation,
            source: source.into(),
        }
    }

    /// Machine-readable code reported to API clients. Users are only ever
    /// upserted, so teams and pull requests are the duplicates that occur.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists {
                entity: Entity::Team,
                ..
            } => "TEAM_EXISTS",
            Self::AlreadyExists { .. } => "PR_EXISTS",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyMerged { .. } => "PR_MERGED",
            Self::ReviewerNotAssigned { .. } => "NOT_ASSIGNED",
            Self::NoCandidates => "NO_CANDIDATE",
            Self::TooManyReviewers { .. } | Self::InvalidReviewers(_) => "INVALID_REVIEWERS",
            Self::Conflict { .. } => "CONFLICT",
            Self::Cancelled { .. } => "TIMEOUT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
