//! Operations exposed to the transport layer.
//!
//! | Service               | Operations                                     |
//! |-----------------------|------------------------------------------------|
//! | `PullRequestWorkflow` | create, merge, reassign reviewer               |
//! | `TeamService`         | create team, get team, deactivate team         |
//! | `UserService`         | set active flag, list review assignments       |
//! | `StatsService`        | per-user and pull request totals               |
//!
//! Every operation takes a `CancellationToken`. Reads race against it and
//! are abandoned as soon as it fires; writes only check it before they
//! start, because each store write is a single atomic step and a write that
//! has committed must not be reported as cancelled. Reads that follow a
//! committed write go through [`Boundary::after_commit`] for the same reason.

pub mod pull_request;
pub mod stats;
pub mod team;
pub mod user;

pub use pull_request::PullRequestWorkflow;
pub use stats::StatsService;
pub use team::{TeamMember, TeamService};
pub use user::UserService;

use std::future::Future;

use reviewer_common::ReviewError;
use tokio_util::sync::CancellationToken;

use crate::store::StoreResult;

/// The storage-access boundary of a single operation.
pub(crate) struct Boundary<'a> {
    cancel: &'a CancellationToken,
    operation: &'static str,
}

impl<'a> Boundary<'a> {
    pub(crate) fn new(cancel: &'a CancellationToken, operation: &'static str) -> Self {
        Self { cancel, operation }
    }

    fn cancelled(&self) -> ReviewError {
        ReviewError::Cancelled {
            operation: self.operation,
        }
    }

    /// Run a read, abandoning it if the operation is cancelled first. Any
    /// store failure becomes `ReviewError::Internal`.
    pub(crate) async fn read<T>(
        &self,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, ReviewError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            result = call => result.map_err(|e| self.internal(e)),
        }
    }

    /// Run a write to completion unless cancellation arrived before it
    /// started. The store result is handed back untouched so callers can
    /// translate duplicate keys and version conflicts.
    pub(crate) async fn write<T>(
        &self,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<StoreResult<T>, ReviewError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(call.await)
    }

    /// Run a read that follows a committed write. Cancellation is not
    /// observed here; the operation's outcome is already decided.
    pub(crate) async fn after_commit<T>(
        &self,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, ReviewError> {
        call.await.map_err(|e| self.internal(e))
    }

    pub(crate) fn internal(&self, err: crate::store::StoreError) -> ReviewError {
        tracing::error!(operation = self.operation, error = %err, "storage failure");
        ReviewError::internal(self.operation, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn test_read_after_cancel_is_rejected() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let io = Boundary::new(&cancel, "test::read");
        let err = io.read(async { Ok::<_, StoreError>(1) }).await.unwrap_err();
        assert!(matches!(err, ReviewError::Cancelled { operation: "test::read" }));
    }

    #[tokio::test]
    async fn test_pending_read_aborts_on_cancel() {
        let cancel = CancellationToken::new();
        let io = Boundary::new(&cancel, "test::read");
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = io
            .read(std::future::pending::<StoreResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_read_maps_store_failure_to_internal() {
        let cancel = CancellationToken::new();
        let io = Boundary::new(&cancel, "test::read");
        let err = io
            .read(async { Err::<(), _>(StoreError::Backend(anyhow::anyhow!("boom"))) })
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Internal { operation: "test::read", .. }));
    }

    #[tokio::test]
    async fn test_write_hands_back_store_result() {
        let cancel = CancellationToken::new();
        let io = Boundary::new(&cancel, "test::write");
        let result = io
            .write(async {
                Err::<(), _>(StoreError::Duplicate {
                    key: "pr-1".into(),
                })
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn test_after_commit_ignores_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let io = Boundary::new(&cancel, "test::after_commit");
        let value = io.after_commit(async { Ok::<_, StoreError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
