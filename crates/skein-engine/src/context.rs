use crate::traits::{CommandBuilder, InstanceStore, OutputCapture};
use skein_core::config::ExecutionConfig;
use skein_core::model::{JobEvent, JobHandle};
use skein_scheduler::SchedulerGateway;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

/// The engine's pluggable collaborators.
pub struct Collaborators {
    pub gateway: Arc<dyn SchedulerGateway>,
    pub builder: Arc<dyn CommandBuilder>,
    pub store: Arc<dyn InstanceStore>,
    pub outputs: Arc<dyn OutputCapture>,
}

/// Shared state handed to every worker thread.
pub(crate) struct EngineContext {
    pub gateway: Arc<dyn SchedulerGateway>,
    pub builder: Arc<dyn CommandBuilder>,
    pub store: Arc<dyn InstanceStore>,
    pub outputs: Arc<dyn OutputCapture>,
    pub exec_config: ExecutionConfig,
    pub events: Sender<JobEvent>,
}

impl EngineContext {
    pub fn new(
        collaborators: Collaborators,
        exec_config: ExecutionConfig,
        events: Sender<JobEvent>,
    ) -> Self {
        EngineContext {
            gateway: collaborators.gateway,
            builder: collaborators.builder,
            store: collaborators.store,
            outputs: collaborators.outputs,
            exec_config,
            events,
        }
    }

    /// Events are fire-and-forget: once the dispatcher has stopped, late
    /// worker events have nothing left to influence.
    pub fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    pub fn persist(&self, handle: &JobHandle) {
        if let Err(e) = self.store.save_step(handle) {
            tracing::warn!("Failed to persist step '{}': {}", handle.name, e);
        }
    }
}

/// A poisoned handle lock only means another worker panicked mid-update;
/// the state machine transitions below stay valid, so recover the guard.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
