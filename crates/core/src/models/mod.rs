pub mod event;
pub mod resolution;
pub mod sidecar;
pub mod workload;

pub use event::{DispatchEvent, EventContext};
pub use resolution::{Resolution, ResolutionGuard};
pub use sidecar::{AccessKeys, SidecarArgs};
pub use workload::{
    ownership_selector, sanitize_label_value, InFlightRecord, ObservedWorkload, ReconcileReport,
    WorkloadId, WorkloadSpec, WorkloadState, LABEL_CORRELATION_ID, LABEL_EVENT_ID,
    LABEL_MANAGED_BY, LABEL_MODULE, MANAGED_BY_VALUE,
};
