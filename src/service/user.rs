use std::sync::Arc;

use reviewer_common::{Entity, PullRequest, ReviewError, User};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Boundary;
use crate::store::Store;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Toggle whether a user can be picked as a reviewer. Existing
    /// assignments are left alone.
    pub async fn set_is_active(
        &self,
        user_id: &str,
        is_active: bool,
        cancel: &CancellationToken,
    ) -> Result<User, ReviewError> {
        let io = Boundary::new(cancel, "UserService::set_is_active");

        let user = io
            .read(self.store.get_user(user_id))
            .await?
            .ok_or_else(|| ReviewError::not_found(Entity::User, user_id))?
            .with_active(is_active);

        let updated = io
            .write(self.store.update_user(&user))
            .await?
            .map_err(|e| io.internal(e))?;
        if !updated {
            return Err(ReviewError::not_found(Entity::User, user_id));
        }

        info!(user_id, is_active, "user activity changed");
        Ok(user)
    }

    /// Pull requests the user is currently assigned to review, oldest
    /// first. Unknown users have none.
    pub async fn get_reviews(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PullRequest>, ReviewError> {
        Boundary::new(cancel, "UserService::get_reviews")
            .read(self.store.pull_requests_by_reviewer(user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PullRequestStore, TeamStore};
    use chrono::Utc;
    use reviewer_common::Team;

    async fn seeded() -> (Arc<MemoryStore>, UserService) {
        let store = Arc::new(MemoryStore::new());
        let members = ["a", "b"]
            .iter()
            .map(|id| User {
                user_id: id.to_string(),
                username: id.to_string(),
                team_name: "backend".into(),
                is_active: true,
                created_at: Utc::now(),
            })
            .collect();
        store
            .create_team(&Team {
                team_name: "backend".into(),
                members,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (store.clone(), UserService::new(store))
    }

    #[tokio::test]
    async fn test_set_is_active() {
        let (_, svc) = seeded().await;
        let cancel = CancellationToken::new();
        let user = svc.set_is_active("a", false, &cancel).await.unwrap();
        assert!(!user.is_active);
        assert_eq!(user.team_name, "backend");

        let user = svc.set_is_active("a", true, &cancel).await.unwrap();
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn test_set_is_active_unknown_user() {
        let (_, svc) = seeded().await;
        let err = svc
            .set_is_active("ghost", false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReviewError::NotFound {
                entity: Entity::User,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_get_reviews() {
        let (store, svc) = seeded().await;
        let cancel = CancellationToken::new();
        let pr = PullRequest::open("pr-1", "x", "a", vec!["b".into()], Utc::now()).unwrap();
        store.insert_pull_request(&pr).await.unwrap();

        let reviews = svc.get_reviews("b", &cancel).await.unwrap();
        assert_eq!(reviews, vec![pr]);
        assert!(svc.get_reviews("a", &cancel).await.unwrap().is_empty());
        assert!(svc.get_reviews("ghost", &cancel).await.unwrap().is_empty());
    }
}
