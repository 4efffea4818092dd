//! # jobgate testing utils
//!
//! Shared test doubles for the jobgate workspace.
//!
//! - **Queue doubles**: [`MockMessage`] records every resolution attempt,
//!   [`ScriptedQueueListener`] replays a fixed sequence of receive outcomes
//! - **Provider doubles**: [`MockProvider`] with scriptable dispatch and
//!   reconcile behaviour
//! - **Backend doubles**: [`InMemoryWorkloadBackend`], a compute backend
//!   whose workload states tests can flip
//! - **Builders**: ready-to-use configuration and event payloads
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! jobgate-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
