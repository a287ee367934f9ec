//! Workflow execution engine: turns a flattened workflow instance into
//! scheduler submissions, tracks step lifecycles through START/DONE/EXIT
//! events, and drives the instance to a single exit code.

mod context;
mod error;
mod orchestrator;
mod pool;
mod recovery;
mod runner;
mod scatter;
mod submit;
mod traits;
mod wait;

pub use context::Collaborators;
pub use error::{EngineError, Result};
pub use orchestrator::WorkflowOrchestrator;
pub use pool::{EnginePools, WorkerPool};
pub use recovery::RecoveryOutcome;
pub use runner::{Listen, StepRunner};
pub use traits::{CommandBuilder, InstanceStore, OutputCapture};
