use crate::error::Result;
use skein_core::model::{JobHandle, ScatterBundle, WorkflowInstance};

/// Renders a step's concrete argv. Input binding and command-line
/// construction belong to the tool-description layer; the engine only
/// decides *when* each of these is invoked.
pub trait CommandBuilder: Send + Sync {
    /// Builds the final argv for a step whose inputs are all resolved.
    fn build_final_command(&self, handle: &JobHandle) -> Result<Vec<String>>;

    /// Builds the argv a held placeholder submission runs. The returned
    /// command executes `handle.script_path`, whose content is filled in
    /// later by `bind_step_inputs` plus a script rewrite.
    fn build_placeholder_command(&self, handle: &JobHandle) -> Result<Vec<String>>;

    /// Expands a scattered step into one argv per scatter element.
    fn build_scatter_bundle(&self, handle: &JobHandle) -> Result<ScatterBundle>;

    /// Resolves `handle.pending_inputs` against the finished dependency
    /// handles, mutating the step's bindings in place.
    fn bind_step_inputs(&self, handle: &mut JobHandle, deps: &[JobHandle]) -> Result<()>;
}

/// Persists step and instance records after every state transition.
pub trait InstanceStore: Send + Sync {
    fn save_step(&self, handle: &JobHandle) -> Result<()>;

    fn save_instance(&self, instance: &WorkflowInstance) -> Result<()>;
}

/// Collects tool outputs once a step (or the whole instance) completes.
/// The engine calls `capture_step_outputs` at most once per step and run;
/// an output marker under the step's work directory additionally skips
/// capture for steps that finished in an earlier run.
pub trait OutputCapture: Send + Sync {
    fn capture_step_outputs(&self, handle: &JobHandle) -> Result<()>;

    fn capture_workflow_outputs(
        &self,
        instance: &WorkflowInstance,
        steps: &[JobHandle],
    ) -> Result<()>;
}
