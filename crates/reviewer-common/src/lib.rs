//! Shared domain types for the pull-request reviewer service.
//!
//! Nothing in this crate performs I/O: the entities carry their own
//! transition functions and the selector only consumes randomness.

pub mod error;
pub mod models;
pub mod selector;

pub use error::{Entity, ReviewError};
pub use models::{MAX_REVIEWERS, PrStats, PrStatus, PullRequest, Team, User, UserStats};
pub use selector::ReviewerSelector;
