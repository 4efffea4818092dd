use async_trait::async_trait;

use super::message::QueueMessage;
use crate::{
    models::{InFlightRecord, ReconcileReport, SidecarArgs},
    DispatcherResult,
};

/// Compute-backend abstraction driven by the dispatch and reconciliation loops.
///
/// One instance is shared by both loops for the lifetime of the process, so
/// implementations must keep any bookkeeping safe under concurrent
/// `dispatch` and `reconcile` calls.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submits one unit of work for `message` and resolves the message.
    ///
    /// Returns once the backend has accepted the submission, not once the
    /// work completes. The message must be acknowledged, released or
    /// rejected before this returns, on success and on failure.
    async fn dispatch(
        &self,
        message: &dyn QueueMessage,
        sidecar: &SidecarArgs,
    ) -> DispatcherResult<()>;

    /// One idempotent drift-correction pass. Must not block indefinitely.
    async fn reconcile(&self) -> DispatcherResult<ReconcileReport>;

    /// Snapshot of the work this provider believes is still running.
    async fn in_flight(&self) -> Vec<InFlightRecord>;
}
