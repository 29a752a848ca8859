//! Document lifecycle processing
//!
//! The lifecycle state machine decides which transitions are legal; the
//! orchestrators drive one document through one stage each, holding a
//! [`TaskHandle`] from the registry for the whole run.

pub mod analysis;
pub mod batch;
pub mod extraction;
pub mod lifecycle;
pub mod materialize;
pub mod pipeline;
pub mod poller;
pub mod recovery;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::AnalysisOrchestrator;
pub use batch::{BatchCoordinator, BatchFailure, BatchReport, BatchTarget};
pub use extraction::ExtractionOrchestrator;
pub use lifecycle::Transition;
pub use materialize::Materializer;
pub use pipeline::{Collaborators, Pipeline};
pub use poller::{JobPoller, PollOutcome, PollStatus};
pub use recovery::RecoveryReport;
pub use registry::{TaskHandle, TaskKind, TaskRegistry};
