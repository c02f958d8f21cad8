//! Reviewer selection.
//!
//! Pure functions over a team roster: the only side effect is consuming
//! randomness, so the workflow can hand in whatever roster it loaded and the
//! tests can drive the selector with fixed rosters and a seeded RNG.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::ReviewError;
use crate::models::{MAX_REVIEWERS, User};

pub struct ReviewerSelector {
    rng: Mutex<StdRng>,
}

impl ReviewerSelector {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic selector for reproducible tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Pick up to [`MAX_REVIEWERS`] distinct active members other than the
    /// author. An empty result is valid: a pull request may open without
    /// reviewers when nobody else on the team is active.
    pub fn select_reviewers(&self, members: &[User], author_id: &str) -> Vec<String> {
        let candidates = candidates(members, author_id, &[]);
        self.pick(&candidates, MAX_REVIEWERS)
    }

    /// Pick one active member who is neither the author nor already
    /// reviewing.
    pub fn find_replacement(
        &self,
        members: &[User],
        author_id: &str,
        current_reviewers: &[String],
    ) -> Result<String, ReviewError> {
        let candidates = candidates(members, author_id, current_reviewers);
        self.pick(&candidates, 1)
            .pop()
            .ok_or(ReviewError::NoCandidates)
    }

    fn pick(&self, candidates: &[&str], count: usize) -> Vec<String> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        candidates
            .choose_multiple(&mut *rng, count.min(candidates.len()))
            .map(|id| id.to_string())
            .collect()
    }
}

impl Default for ReviewerSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Active members minus the author and `exclude`, in roster order, each id
/// at most once.
fn candidates<'a>(members: &'a [User], author_id: &str, exclude: &[String]) -> Vec<&'a str> {
    let mut excluded: HashSet<&str> = exclude.iter().map(String::as_str).collect();
    excluded.insert(author_id);

    let mut out = Vec::new();
    for member in members.iter().filter(|m| m.is_active) {
        if excluded.insert(member.user_id.as_str()) {
            out.push(member.user_id.as_str());
        }
    }
    out
}
