use std::sync::Arc;

use reviewer_common::{PrStats, ReviewError, UserStats};
use tokio_util::sync::CancellationToken;

use super::Boundary;
use crate::store::Store;

/// Read-only assignment counters.
#[derive(Clone)]
pub struct StatsService {
    store: Arc<dyn Store>,
}

impl StatsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn user_stats(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserStats>, ReviewError> {
        Boundary::new(cancel, "StatsService::user_stats")
            .read(self.store.user_stats())
            .await
    }

    pub async fn pr_stats(&self, cancel: &CancellationToken) -> Result<PrStats, ReviewError> {
        Boundary::new(cancel, "StatsService::pr_stats")
            .read(self.store.pr_stats())
            .await
    }
}
