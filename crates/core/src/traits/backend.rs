use async_trait::async_trait;

use crate::{
    models::{ObservedWorkload, WorkloadId, WorkloadSpec},
    DispatcherResult,
};

/// Thin contract over a compute backend's API.
///
/// Implementations only translate; bookkeeping, timeouts and message
/// resolution live in the provider built on top.
#[async_trait]
pub trait WorkloadBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn submit(&self, spec: &WorkloadSpec) -> DispatcherResult<WorkloadId>;

    /// Workloads created by this dispatcher that still exist on the backend.
    async fn list_owned(&self) -> DispatcherResult<Vec<ObservedWorkload>>;

    async fn remove(&self, id: &WorkloadId) -> DispatcherResult<()>;
}
