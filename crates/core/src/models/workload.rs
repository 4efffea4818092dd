use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "jobgate";
pub const LABEL_MODULE: &str = "jobgate/module";
pub const LABEL_EVENT_ID: &str = "jobgate/event-id";
pub const LABEL_CORRELATION_ID: &str = "jobgate/correlation-id";

/// Selector matching every workload this dispatcher created for `module`.
pub fn ownership_selector(module: &str) -> String {
    format!("{LABEL_MANAGED_BY}={MANAGED_BY_VALUE},{LABEL_MODULE}={module}")
}

/// Coerces an arbitrary id into a valid label value: at most 63 characters
/// of `[A-Za-z0-9._-]`, starting and ending alphanumeric.
pub fn sanitize_label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .take(63)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Backend-native identifier of a dispatched workload (Kubernetes job name,
/// Batch task id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkloadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for WorkloadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl WorkloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkloadState::Succeeded | WorkloadState::Failed)
    }
}

/// Everything a backend needs to submit one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    /// Backend-safe name, also used as the workload id.
    pub name: String,
    pub module: String,
    pub module_image: String,
    pub sidecar_image: String,
    pub sidecar_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub event_id: String,
    pub correlation_id: String,
    pub max_running_minutes: u64,
}

/// A workload as reported by the backend during reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedWorkload {
    pub id: WorkloadId,
    pub state: WorkloadState,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping entry for a workload this dispatcher submitted and has not
/// yet seen finish.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightRecord {
    pub workload_id: WorkloadId,
    pub message_id: String,
    pub event_id: String,
    pub correlation_id: String,
    pub dispatched_at: DateTime<Utc>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub observed: usize,
    pub completed: Vec<WorkloadId>,
    pub failed: Vec<WorkloadId>,
    pub expired: Vec<WorkloadId>,
    /// In-flight records dropped because the backend no longer knows them.
    pub orphaned: Vec<WorkloadId>,
    pub removal_failures: usize,
    /// Cleanups left for the next pass once this pass ran out of time.
    pub deferred: usize,
}

impl ReconcileReport {
    pub fn cleaned_up(&self) -> usize {
        self.completed.len() + self.failed.len() + self.expired.len()
    }

    pub fn is_noop(&self) -> bool {
        self.cleaned_up() == 0
            && self.orphaned.is_empty()
            && self.removal_failures == 0
            && self.deferred == 0
    }
}
