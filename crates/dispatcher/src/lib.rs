//! The dispatcher control plane: sidecar composition, the workload
//! provider, the dispatch and reconciliation loops and the orchestrator that
//! runs them.

pub mod backoff;
pub mod dispatch_loop;
pub mod in_flight;
pub mod orchestrator;
pub mod provider;
pub mod provider_factory;
pub mod reconcile_loop;
pub mod shutdown;
pub mod sidecar;
pub mod telemetry;

pub use backoff::RetryPolicy;
pub use dispatch_loop::DispatchLoop;
pub use in_flight::InFlightStore;
pub use orchestrator::Orchestrator;
pub use provider::{AzureBatchProvider, KubernetesProvider, ProviderSettings, WorkloadProvider};
pub use provider_factory::{build_provider, select_provider_kind};
pub use reconcile_loop::ReconcileLoop;
pub use shutdown::ShutdownManager;
pub use sidecar::compose_sidecar_args;
