use std::sync::Arc;

use chrono::Utc;
use reviewer_common::{Entity, PullRequest, ReviewError, ReviewerSelector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Boundary;
use crate::store::{Store, StoreError};

/// Orchestrates pull request creation, merging and reviewer reassignment.
///
/// This is the only code that writes pull requests. Each operation re-reads
/// what it needs, derives the next snapshot, and writes it back with a
/// version check so a concurrent writer is never silently overwritten.
#[derive(Clone)]
pub struct PullRequestWorkflow {
    store: Arc<dyn Store>,
    selector: Arc<ReviewerSelector>,
}

impl PullRequestWorkflow {
    pub fn new(store: Arc<dyn Store>, selector: Arc<ReviewerSelector>) -> Self {
        Self { store, selector }
    }

    pub async fn create_pr(
        &self,
        pr_id: &str,
        pr_name: &str,
        author_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, ReviewError> {
        let io = Boundary::new(cancel, "PullRequestWorkflow::create_pr");

        if io.read(self.store.pull_request_exists(pr_id)).await? {
            return Err(ReviewError::already_exists(Entity::PullRequest, pr_id));
        }
        let author = io
            .read(self.store.get_user(author_id))
            .await?
            .ok_or_else(|| ReviewError::not_found(Entity::User, author_id))?;
        let roster = io.read(self.store.users_by_team(&author.team_name)).await?;

        let reviewers = self.selector.select_reviewers(&roster, author_id);
        let pr = PullRequest::open(pr_id, pr_name, author_id, reviewers, Utc::now())?;

        match io.write(self.store.insert_pull_request(&pr)).await? {
            Ok(()) => {}
            // Lost a race with a concurrent create of the same id.
            Err(StoreError::Duplicate { .. }) => {
                return Err(ReviewError::already_exists(Entity::PullRequest, pr_id));
            }
            Err(e) => return Err(io.internal(e)),
        }

        info!(
            pr_id,
            author_id,
            reviewers = ?pr.assigned_reviewers,
            "pull request created"
        );
        Ok(pr)
    }

    /// Merge a pull request. Merging an already merged pull request returns
    /// it unchanged.
    ///
    /// A merge that loses a race re-reads once. If the winner merged, that
    /// state is returned; otherwise the merge is applied to the fresh
    /// snapshot. Losing that second attempt too yields `Conflict`.
    pub async fn merge_pr(
        &self,
        pr_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, ReviewError> {
        let io = Boundary::new(cancel, "PullRequestWorkflow::merge_pr");

        let pr = self.load(&io, pr_id).await?;
        if pr.is_merged() {
            debug!(pr_id, "pull request already merged");
            return Ok(pr);
        }
        if let Some(merged) = self.try_merge(&io, pr).await? {
            return Ok(merged);
        }

        let current = self.load(&io, pr_id).await?;
        if current.is_merged() {
            return Ok(current);
        }
        debug!(pr_id, "merge lost a race, retrying on the fresh snapshot");
        match self.try_merge(&io, current).await? {
            Some(merged) => Ok(merged),
            None => Err(ReviewError::Conflict {
                pr_id: pr_id.to_string(),
            }),
        }
    }

    /// Write the merged form of `pr`. `None` means another writer got there
    /// first.
    async fn try_merge(
        &self,
        io: &Boundary<'_>,
        pr: PullRequest,
    ) -> Result<Option<PullRequest>, ReviewError> {
        let expected = pr.version;
        let merged = pr.merged(Utc::now());
        match io.write(self.store.compare_and_swap(expected, &merged)).await? {
            Ok(()) => {
                info!(pr_id = %merged.pull_request_id, "pull request merged");
                Ok(Some(merged))
            }
            Err(StoreError::VersionConflict { .. }) => Ok(None),
            Err(e) => Err(io.internal(e)),
        }
    }

    /// Swap `old_reviewer_id` for a random eligible teammate of theirs.
    /// Returns the updated pull request and the new reviewer's id.
    pub async fn reassign_reviewer(
        &self,
        pr_id: &str,
        old_reviewer_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(PullRequest, String), ReviewError> {
        let io = Boundary::new(cancel, "PullRequestWorkflow::reassign_reviewer");

        let pr = self.load(&io, pr_id).await?;
        if pr.is_merged() {
            return Err(ReviewError::AlreadyMerged {
                pr_id: pr_id.to_string(),
            });
        }
        if !pr.has_reviewer(old_reviewer_id) {
            return Err(ReviewError::ReviewerNotAssigned {
                pr_id: pr_id.to_string(),
                reviewer_id: old_reviewer_id.to_string(),
            });
        }

        let old_reviewer = io
            .read(self.store.get_user(old_reviewer_id))
            .await?
            .ok_or_else(|| ReviewError::not_found(Entity::User, old_reviewer_id))?;
        let roster = io
            .read(self.store.users_by_team(&old_reviewer.team_name))
            .await?;

        let new_reviewer_id =
            self.selector
                .find_replacement(&roster, &pr.author_id, &pr.assigned_reviewers)?;
        let next = pr.with_replaced_reviewer(old_reviewer_id, &new_reviewer_id)?;

        match io.write(self.store.compare_and_swap(pr.version, &next)).await? {
            Ok(()) => {
                info!(
                    pr_id,
                    old_reviewer_id,
                    new_reviewer_id = %new_reviewer_id,
                    "reviewer reassigned"
                );
                Ok((next, new_reviewer_id))
            }
            Err(StoreError::VersionConflict { .. }) => Err(ReviewError::Conflict {
                pr_id: pr_id.to_string(),
            }),
            Err(e) => Err(io.internal(e)),
        }
    }

    async fn load(&self, io: &Boundary<'_>, pr_id: &str) -> Result<PullRequest, ReviewError> {
        io.read(self.store.get_pull_request(pr_id))
            .await?
            .ok_or_else(|| ReviewError::not_found(Entity::PullRequest, pr_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::HookedStore;
    use crate::store::{MemoryStore, PullRequestStore, TeamStore, UserStore};
    use chrono::Utc;
    use reviewer_common::{PrStatus, Team, User};

    fn user(id: &str, team: &str, active: bool) -> User {
        User {
            user_id: id.to_string(),
            username: id.to_uppercase(),
            team_name: team.to_string(),
            is_active: active,
            created_at: Utc::now(),
        }
    }

    async fn setup(members: &[(&str, bool)]) -> (Arc<MemoryStore>, PullRequestWorkflow) {
        let store = Arc::new(MemoryStore::new());
        store
            .create_team(&Team {
                team_name: "T".to_string(),
                members: members.iter().map(|(id, a)| user(id, "T", *a)).collect(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let workflow =
            PullRequestWorkflow::new(store.clone(), Arc::new(ReviewerSelector::seeded(11)));
        (store, workflow)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_team_t_scenario() {
        let (_, wf) = setup(&[("A", true), ("B", true), ("C", true), ("D", false)]).await;

        let pr = wf.create_pr("pr-1", "Feature", "A", &token()).await.unwrap();
        assert_eq!(pr.status, PrStatus::Open);
        assert!(pr.assigned_reviewers.len() <= 2);
        assert!(
            pr.assigned_reviewers
                .iter()
                .all(|r| r == "B" || r == "C")
        );

        let merged = wf.merge_pr("pr-1", &token()).await.unwrap();
        assert_eq!(merged.status, PrStatus::Merged);
        assert!(merged.merged_at.is_some());

        let again = wf.merge_pr("pr-1", &token()).await.unwrap();
        assert_eq!(again, merged);

        let err = wf.reassign_reviewer("pr-1", "B", &token()).await.unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyMerged { .. }));
    }

    #[tokio::test]
    async fn test_create_with_only_author_active() {
        let (store, wf) = setup(&[("A", true), ("B", false)]).await;
        let pr = wf.create_pr("pr-1", "Solo", "A", &token()).await.unwrap();
        assert!(pr.assigned_reviewers.is_empty());
        assert!(store.pull_request_exists("pr-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_duplicate_id() {
        let (_, wf) = setup(&[("A", true), ("B", true)]).await;
        wf.create_pr("pr-1", "First", "A", &token()).await.unwrap();
        let err = wf.create_pr("pr-1", "Second", "B", &token()).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::AlreadyExists {
                entity: Entity::PullRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_unknown_author() {
        let (_, wf) = setup(&[("A", true)]).await;
        let err = wf.create_pr("pr-1", "x", "ghost", &token()).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::NotFound {
                entity: Entity::User,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_merge_unknown_pr() {
        let (_, wf) = setup(&[("A", true)]).await;
        let err = wf.merge_pr("nope", &token()).await.unwrap_err();
        assert!(matches!(
            err,
            ReviewError::NotFound {
                entity: Entity::PullRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_second_merge_keeps_merged_at() {
        let (store, wf) = setup(&[("A", true), ("B", true)]).await;
        wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();
        let first = wf.merge_pr("pr-1", &token()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = wf.merge_pr("pr-1", &token()).await.unwrap();
        assert_eq!(first.merged_at, second.merged_at);
        let stored = store.get_pull_request("pr-1").await.unwrap().unwrap();
        assert_eq!(stored.merged_at, first.merged_at);
    }

    #[tokio::test]
    async fn test_reassign_replaces_in_place() {
        let (store, wf) = setup(&[("A", true), ("B", true), ("C", true), ("E", true)]).await;
        let pr = wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();
        assert_eq!(pr.assigned_reviewers.len(), 2);

        let old = pr.assigned_reviewers[0].clone();
        let kept = pr.assigned_reviewers[1].clone();
        let (updated, new_id) = wf.reassign_reviewer("pr-1", &old, &token()).await.unwrap();

        assert_ne!(new_id, old);
        assert_ne!(new_id, kept);
        assert_ne!(new_id, "A");
        assert_eq!(updated.assigned_reviewers, vec![new_id.clone(), kept]);
        assert_eq!(
            store.get_pull_request("pr-1").await.unwrap().unwrap(),
            updated
        );
    }

    #[tokio::test]
    async fn test_reassign_unassigned_reviewer() {
        let (_, wf) = setup(&[("A", true), ("B", true)]).await;
        wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();
        let err = wf.reassign_reviewer("pr-1", "Z", &token()).await.unwrap_err();
        assert!(matches!(err, ReviewError::ReviewerNotAssigned { .. }));
    }

    #[tokio::test]
    async fn test_reassign_merged_wins_over_not_assigned() {
        let (_, wf) = setup(&[("A", true), ("B", true)]).await;
        wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();
        wf.merge_pr("pr-1", &token()).await.unwrap();
        let err = wf.reassign_reviewer("pr-1", "Z", &token()).await.unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyMerged { .. }));
    }

    #[tokio::test]
    async fn test_reassign_without_candidates_persists_nothing() {
        let (store, wf) = setup(&[("A", true), ("B", true), ("C", false)]).await;
        let pr = wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();
        assert_eq!(pr.assigned_reviewers, vec!["B"]);

        let err = wf.reassign_reviewer("pr-1", "B", &token()).await.unwrap_err();
        assert!(matches!(err, ReviewError::NoCandidates));
        assert_eq!(store.get_pull_request("pr-1").await.unwrap().unwrap(), pr);
    }

    #[tokio::test]
    async fn test_reassign_uses_old_reviewers_team() {
        let (store, wf) = setup(&[("A", true), ("B", true)]).await;
        wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();

        // B moves to another team where X is available.
        store
            .create_team(&Team {
                team_name: "U".to_string(),
                members: vec![user("B", "U", true), user("X", "U", true)],
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let (_, new_id) = wf.reassign_reviewer("pr-1", "B", &token()).await.unwrap();
        assert_eq!(new_id, "X");
    }

    #[tokio::test]
    async fn test_reassign_after_deactivation() {
        let (store, wf) = setup(&[("A", true), ("B", true), ("C", true), ("E", true)]).await;
        let pr = wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();
        let old = pr.assigned_reviewers[0].clone();
        let old_user = store.get_user(&old).await.unwrap().unwrap();
        store.update_user(&old_user.with_active(false)).await.unwrap();

        let (updated, new_id) = wf.reassign_reviewer("pr-1", &old, &token()).await.unwrap();
        assert!(!updated.has_reviewer(&old));
        assert!(updated.has_reviewer(&new_id));
    }

    #[tokio::test]
    async fn test_cancelled_create_persists_nothing() {
        let (store, wf) = setup(&[("A", true), ("B", true)]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wf.create_pr("pr-1", "x", "A", &cancel).await.unwrap_err();
        assert!(matches!(err, ReviewError::Cancelled { .. }));
        assert!(!store.pull_request_exists("pr-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_merges_agree_on_merged_at() {
        let (_, wf) = setup(&[("A", true), ("B", true)]).await;
        wf.create_pr("pr-1", "x", "A", &token()).await.unwrap();

        let cancel = token();
        let merges = (0..10).map(|_| wf.merge_pr("pr-1", &cancel));
        let results = futures::future::join_all(merges).await;

        let merged_at: Vec<_> = results
            .into_iter()
            .map(|r| r.unwrap().merged_at.unwrap())
            .collect();
        assert!(merged_at.iter().all(|t| *t == merged_at[0]));
    }

    // =========================================================================
    // Merge racing a reassignment
    // =========================================================================

    async fn hooked_setup() -> (Arc<HookedStore>, PullRequestWorkflow, PullRequest) {
        let store = Arc::new(HookedStore::new());
        store
            .create_team(&Team {
                team_name: "T".to_string(),
                members: ["A", "B", "C", "E"]
                    .iter()
                    .map(|id| user(id, "T", true))
                    .collect(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let wf = PullRequestWorkflow::new(store.clone(), Arc::new(ReviewerSelector::seeded(11)));
        let pr = PullRequest::open("pr-1", "x", "A", vec!["B".into(), "C".into()], Utc::now())
            .unwrap();
        store.insert_pull_request(&pr).await.unwrap();
        (store, wf, pr)
    }

    #[tokio::test]
    async fn test_merge_after_reassign_keeps_new_reviewers() {
        let (store, wf, pr) = hooked_setup().await;
        let reassigned = pr.with_replaced_reviewer("B", "E").unwrap();
        store.interleave(reassigned.clone());

        let merged = wf.merge_pr("pr-1", &token()).await.unwrap();
        assert_eq!(merged.status, PrStatus::Merged);
        assert_eq!(merged.assigned_reviewers, ["E", "C"]);

        let stored = store.get_pull_request("pr-1").await.unwrap().unwrap();
        assert_eq!(stored, merged);
        assert_eq!(stored.version, reassigned.version + 1);
    }

    #[tokio::test]
    async fn test_merge_losing_twice_is_a_conflict() {
        let (store, wf, pr) = hooked_setup().await;
        let first = pr.with_replaced_reviewer("B", "E").unwrap();
        let second = first.with_replaced_reviewer("E", "B").unwrap();
        store.interleave(first);
        store.interleave(second.clone());

        let err = wf.merge_pr("pr-1", &token()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Conflict { .. }));
        assert_eq!(err.code(), "CONFLICT");

        let stored = store.get_pull_request("pr-1").await.unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(stored.status, PrStatus::Open);
    }

    #[tokio::test]
    async fn test_merge_and_reassign_race_is_consistent() {
        for _ in 0..20 {
            let (store, wf, _) = hooked_setup().await;
            let cancel = token();
            let (merged, reassigned) = tokio::join!(
                wf.merge_pr("pr-1", &cancel),
                wf.reassign_reviewer("pr-1", "B", &cancel)
            );
            let merged = merged.unwrap();
            let stored = store.get_pull_request("pr-1").await.unwrap().unwrap();
            assert_eq!(stored.status, PrStatus::Merged);
            assert_eq!(stored, merged);

            match reassigned {
                // The reassignment landed, so the merged snapshot carries it.
                Ok((_, new_id)) => {
                    assert!(stored.has_reviewer(&new_id));
                    assert!(!stored.has_reviewer("B"));
                }
                Err(err) => {
                    assert!(matches!(
                        err,
                        ReviewError::AlreadyMerged { .. } | ReviewError::Conflict { .. }
                    ));
                    assert_eq!(stored.assigned_reviewers, ["B", "C"]);
                }
            }
        }
    }
}
