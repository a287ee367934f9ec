use crate::context::lock;
use skein_core::errors::DomainError;
use skein_core::model::{JobEvent, JobEventKind, JobHandle, StepId, StepState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Result of offering one START event to a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    /// The event's step is not in this runner's expected-dependency set.
    NotListening,
    /// Counted, but other dependencies are still outstanding.
    Counted,
    /// This event completed the expected set; schedule the wait exactly once.
    Satisfied,
}

/// What one step expects before its wait can be scheduled, derived once
/// when the orchestrator is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DependencyPlan {
    /// START events to collect before dispatching the wait. For a ready
    /// step nothing else depends on, this is the step's own id.
    pub expected: HashSet<StepId>,
    /// All dependencies were already done at build time; bind inputs and
    /// build the final command before the first submission.
    pub bind_now: bool,
    /// The step finished in a previous run; skip it entirely.
    pub rerun_done: bool,
}

/// Reduced view of a sibling step, enough to plan dependencies.
pub(crate) struct SiblingView {
    pub id: StepId,
    pub name: String,
    pub ready_to_run: bool,
    pub done: bool,
    pub pending_inputs: Vec<String>,
}

impl SiblingView {
    pub fn of(handle: &JobHandle) -> Self {
        SiblingView {
            id: handle.id.clone(),
            name: handle.name.clone(),
            ready_to_run: handle.ready_to_run,
            done: handle.state == StepState::Done,
            pending_inputs: handle.pending_inputs.clone(),
        }
    }
}

/// Derives a step's expected-dependency set:
///
/// - a step already `Done` (rerun of a finished instance) expects nothing;
/// - a ready step that no unbound sibling references waits on itself, so
///   its own START triggers its terminal wait;
/// - otherwise the pending inputs name the dependencies, minus any that
///   are already done. An empty remainder means the step can be bound
///   immediately.
pub(crate) fn plan_dependencies(
    handle: &JobHandle,
    siblings: &[SiblingView],
) -> Result<DependencyPlan, DomainError> {
    if handle.state == StepState::Done {
        return Ok(DependencyPlan {
            expected: HashSet::new(),
            bind_now: false,
            rerun_done: true,
        });
    }

    if handle.ready_to_run {
        let referenced = siblings.iter().any(|s| {
            s.id != handle.id
                && !s.ready_to_run
                && !s.done
                && s.pending_inputs.iter().any(|name| *name == handle.name)
        });
        let expected = if referenced {
            HashSet::new()
        } else {
            HashSet::from([handle.id.clone()])
        };
        return Ok(DependencyPlan {
            expected,
            bind_now: false,
            rerun_done: false,
        });
    }

    let mut expected = HashSet::new();
    for input in &handle.pending_inputs {
        let dep = siblings
            .iter()
            .find(|s| s.name == *input)
            .ok_or_else(|| DomainError::UnknownDependency {
                step: handle.id.clone(),
                dependency: input.clone(),
            })?;
        if !dep.done {
            expected.insert(dep.id.clone());
        }
    }
    let bind_now = expected.is_empty();
    Ok(DependencyPlan {
        expected,
        bind_now,
        rerun_done: false,
    })
}

/// Per-step execution state: the shared handle plus the START-event
/// bookkeeping that gates wait dispatch.
pub struct StepRunner {
    id: StepId,
    name: String,
    handle: Arc<Mutex<JobHandle>>,
    expected: HashSet<StepId>,
    satisfied: AtomicUsize,
    rerun_done: bool,
}

impl StepRunner {
    pub(crate) fn new(handle: Arc<Mutex<JobHandle>>, plan: DependencyPlan) -> Self {
        let (id, name) = {
            let guard = lock(&handle);
            (guard.id.clone(), guard.name.clone())
        };
        StepRunner {
            id,
            name,
            handle,
            expected: plan.expected,
            satisfied: AtomicUsize::new(0),
            rerun_done: plan.rerun_done,
        }
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<Mutex<JobHandle>> {
        &self.handle
    }

    pub fn state(&self) -> StepState {
        lock(&self.handle).state
    }

    pub(crate) fn rerun_done(&self) -> bool {
        self.rerun_done
    }

    /// True when the step waits on its own completion rather than on
    /// upstream dependencies.
    pub fn is_self_wait(&self) -> bool {
        self.expected.len() == 1 && self.expected.contains(&self.id)
    }

    pub(crate) fn expected(&self) -> &HashSet<StepId> {
        &self.expected
    }

    /// Offers a START event. The satisfaction counter compares equal to the
    /// expected-set size exactly once, so the wait for this runner is
    /// dispatched exactly once even if duplicate events arrive.
    pub fn listen(&self, event: &JobEvent) -> Listen {
        if event.kind != JobEventKind::Start || !self.expected.contains(&event.step_id) {
            return Listen::NotListening;
        }
        let seen = self.satisfied.fetch_add(1, Ordering::SeqCst) + 1;
        if seen == self.expected.len() {
            Listen::Satisfied
        } else {
            Listen::Counted
        }
    }
}
