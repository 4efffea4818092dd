//! Metric names emitted by the dispatcher loops and providers.

use metrics::{describe_counter, describe_gauge};

pub const MESSAGES_RECEIVED: &str = "jobgate_messages_received_total";
pub const MESSAGES_DISPATCHED: &str = "jobgate_messages_dispatched_total";
pub const DISPATCH_FAILURES: &str = "jobgate_dispatch_failures_total";
pub const MESSAGES_REJECTED: &str = "jobgate_messages_rejected_total";
pub const RECEIVE_FAILURES: &str = "jobgate_receive_failures_total";
pub const RECONCILE_PASSES: &str = "jobgate_reconcile_passes_total";
pub const RECONCILE_FAILURES: &str = "jobgate_reconcile_failures_total";
pub const WORKLOADS_CLEANED: &str = "jobgate_workloads_cleaned_total";
pub const WORKLOADS_IN_FLIGHT: &str = "jobgate_workloads_in_flight";

/// Registers descriptions with the installed recorder. Safe to call more
/// than once.
pub fn describe_metrics() {
    describe_counter!(MESSAGES_RECEIVED, "Messages received from the work queue");
    describe_counter!(MESSAGES_DISPATCHED, "Messages turned into a submitted workload");
    describe_counter!(DISPATCH_FAILURES, "Dispatch attempts that returned an error");
    describe_counter!(MESSAGES_REJECTED, "Messages rejected onto the dead-letter path");
    describe_counter!(RECEIVE_FAILURES, "Transport errors while receiving");
    describe_counter!(RECONCILE_PASSES, "Completed reconciliation passes");
    describe_counter!(RECONCILE_FAILURES, "Failed or timed out reconciliation passes");
    describe_counter!(WORKLOADS_CLEANED, "Workloads removed by reconciliation");
    describe_gauge!(WORKLOADS_IN_FLIGHT, "Workloads submitted and not yet seen finishing");
}
