use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use jobgate_core::{InFlightRecord, WorkloadId};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<WorkloadId, InFlightRecord>,
    /// Workloads removed before their record arrived, keyed to removal time.
    tombstones: HashMap<WorkloadId, DateTime<Utc>>,
}

/// Workloads submitted by this process and not yet seen finishing.
///
/// Shared by concurrent dispatch and reconciliation; every operation takes
/// the lock once, so each is atomic with respect to the others. A removal
/// that lands between a submit and its insert leaves a tombstone, and the
/// late insert is dropped instead of tracking a workload that is gone.
#[derive(Debug, Default)]
pub struct InFlightStore {
    inner: Mutex<Inner>,
}

impl InFlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the workload was already cleaned up.
    pub async fn insert(&self, record: InFlightRecord) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.tombstones.remove(&record.workload_id).is_some() {
            return false;
        }
        inner.records.insert(record.workload_id.clone(), record);
        true
    }

    pub async fn remove(&self, id: &WorkloadId) -> Option<InFlightRecord> {
        let mut inner = self.inner.lock().await;
        let removed = inner.records.remove(id);
        if removed.is_none() {
            inner.tombstones.insert(id.clone(), Utc::now());
        }
        removed
    }

    pub async fn contains(&self, id: &WorkloadId) -> bool {
        self.inner.lock().await.records.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.records.is_empty()
    }

    /// Records sorted by dispatch time.
    pub async fn snapshot(&self) -> Vec<InFlightRecord> {
        let mut records: Vec<_> = self.inner.lock().await.records.values().cloned().collect();
        records.sort_by(|a, b| a.dispatched_at.cmp(&b.dispatched_at));
        records
    }

    /// Drops records the backend no longer reports, skipping anything
    /// dispatched after `cutoff` since it may not be listed yet. Tombstones
    /// older than `cutoff` are pruned too.
    pub async fn drop_unobserved(
        &self,
        observed: &HashSet<WorkloadId>,
        cutoff: DateTime<Utc>,
    ) -> Vec<WorkloadId> {
        let mut inner = self.inner.lock().await;
        inner.tombstones.retain(|_, removed_at| *removed_at > cutoff);
        let stale: Vec<WorkloadId> = inner
            .records
            .values()
            .filter(|r| !observed.contains(&r.workload_id) && r.dispatched_at <= cutoff)
            .map(|r| r.workload_id.clone())
            .collect();
        for id in &stale {
            inner.records.remove(id);
        }
        stale
    }
}
