//! Core types shared by every jobgate crate: the error taxonomy, the
//! message / provider / backend contracts and the domain models that flow
//! between them.

pub mod errors;
pub mod models;
pub mod traits;

pub use errors::{DispatcherError, DispatcherResult, ErrorScope, ReceiveError};
pub use models::{
    ownership_selector, sanitize_label_value, AccessKeys, DispatchEvent, EventContext,
    InFlightRecord, ObservedWorkload, ReconcileReport, Resolution, ResolutionGuard, SidecarArgs,
    WorkloadId, WorkloadSpec, WorkloadState, LABEL_CORRELATION_ID, LABEL_EVENT_ID,
    LABEL_MANAGED_BY, LABEL_MODULE, MANAGED_BY_VALUE,
};
pub use traits::{Provider, QueueListener, QueueMessage, WorkloadBackend};
