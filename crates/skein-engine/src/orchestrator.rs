use crate::context::{lock, Collaborators, EngineContext};
use crate::error::Result;
use crate::pool::EnginePools;
use crate::runner::{self, Listen, SiblingView, StepRunner};
use crate::submit::run_submission;
use crate::wait::run_wait;
use skein_core::config::ExecutionConfig;
use skein_core::constants::exit;
use skein_core::errors::DomainError;
use skein_core::model::{JobEvent, JobEventKind, JobHandle, StepId, StepState, WorkflowInstance};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};

/// Drives one workflow instance to completion. Worker threads broadcast
/// START/DONE/EXIT events over a channel; this dispatcher consumes them
/// one at a time, so counting listeners, scheduling waits and deciding
/// completion all happen inside a single serialized loop.
pub struct WorkflowOrchestrator {
    ctx: Arc<EngineContext>,
    pools: Arc<EnginePools>,
    instance: Arc<Mutex<WorkflowInstance>>,
    runners: Vec<Arc<StepRunner>>,
    by_id: HashMap<StepId, usize>,
    events: Receiver<JobEvent>,
    submitted: AtomicBool,
}

impl WorkflowOrchestrator {
    pub fn new(
        instance: WorkflowInstance,
        mut handles: Vec<JobHandle>,
        collaborators: Collaborators,
        exec_config: ExecutionConfig,
        pools: Arc<EnginePools>,
    ) -> Result<Self> {
        if instance.finished {
            return Err(DomainError::InstanceFinished(instance.name.clone()).into());
        }
        if handles.is_empty() {
            return Err(DomainError::EmptyWorkflow(instance.name.clone()).into());
        }

        let mut by_id = HashMap::with_capacity(handles.len());
        for (index, handle) in handles.iter().enumerate() {
            if by_id.insert(handle.id.clone(), index).is_some() {
                return Err(DomainError::DuplicateStepId(handle.id.clone()).into());
            }
        }

        let (events_tx, events_rx) = channel();
        let ctx = Arc::new(EngineContext::new(collaborators, exec_config, events_tx));

        let siblings: Vec<SiblingView> = handles.iter().map(SiblingView::of).collect();
        let mut plans = Vec::with_capacity(handles.len());
        for handle in &handles {
            plans.push(runner::plan_dependencies(handle, &siblings)?);
        }

        // Steps whose dependencies all finished in a previous run are bound
        // up front; they enter the submission phase as ready steps.
        for index in 0..handles.len() {
            if !plans[index].bind_now {
                continue;
            }
            let dep_snapshots: Vec<JobHandle> = handles
                .iter()
                .filter(|h| h.state == StepState::Done)
                .filter(|h| handles[index].pending_inputs.contains(&h.name))
                .cloned()
                .collect();
            let handle = &mut handles[index];
            ctx.builder.bind_step_inputs(handle, &dep_snapshots)?;
            handle.built_command = ctx.builder.build_final_command(handle)?;
            handle.ready_to_run = true;
        }

        let runners = handles
            .into_iter()
            .zip(plans)
            .map(|(handle, plan)| Arc::new(StepRunner::new(Arc::new(Mutex::new(handle)), plan)))
            .collect();

        Ok(WorkflowOrchestrator {
            ctx,
            pools,
            instance: Arc::new(Mutex::new(instance)),
            runners,
            by_id,
            events: events_rx,
            submitted: AtomicBool::new(false),
        })
    }

    /// Runs the instance to completion and returns its exit code.
    pub fn run(&self) -> Result<i32> {
        self.submit_all();
        self.event_loop()
    }

    /// Dispatches the initial submission for every unfinished step. Ready
    /// scattered steps go to the scatter pool; everything else to the
    /// submission pool. Idempotent.
    pub fn submit_all(&self) {
        if self.submitted.swap(true, Ordering::SeqCst) {
            return;
        }
        for runner in &self.runners {
            if runner.rerun_done() {
                tracing::debug!("Step '{}' already done; skipping", runner.name());
                continue;
            }
            let scattered = {
                let guard = lock(runner.handle());
                guard.ready_to_run && guard.scatter.is_some()
            };
            let ctx = Arc::clone(&self.ctx);
            let runner = Arc::clone(runner);
            let pool = if scattered {
                &self.pools.scatter
            } else {
                &self.pools.submission
            };
            pool.spawn(move || run_submission(ctx, runner));
        }
    }

    fn event_loop(&self) -> Result<i32> {
        // Everything may already be done when rerunning a finished tree.
        if self.done_count() == self.runners.len() {
            return self.finish_success();
        }

        loop {
            let event = match self.events.recv() {
                Ok(event) => event,
                Err(_) => {
                    // Channel closed without completion; treat as shutdown.
                    return self.finish_exited(exit::SHUTDOWN);
                }
            };
            match event.kind {
                JobEventKind::Start => self.on_start(&event),
                JobEventKind::Done => {
                    if let Some(code) = self.on_done(&event)? {
                        return Ok(code);
                    }
                }
                JobEventKind::Exit => return self.on_exit(&event),
            }
        }
    }

    /// Offers a START to every live runner. Whichever runners report their
    /// expected set satisfied get their wait scheduled; if nobody listens,
    /// the emitting step has no dependents and receives a terminal wait on
    /// its own job.
    fn on_start(&self, event: &JobEvent) {
        tracing::info!("Step '{}' started", event.step_name);

        let mut listeners = 0;
        let mut satisfied = Vec::new();
        for (index, runner) in self.runners.iter().enumerate() {
            if runner.state().is_terminal() {
                continue;
            }
            match runner.listen(event) {
                Listen::NotListening => {}
                Listen::Counted => listeners += 1,
                Listen::Satisfied => {
                    listeners += 1;
                    satisfied.push(index);
                }
            }
        }

        if listeners == 0 {
            // Nothing depends on this step; wait on its own job directly.
            if let Some(&index) = self.by_id.get(&event.step_id) {
                self.dispatch_wait(index, true);
            }
        }
        for index in satisfied {
            let terminal = self.runners[index].is_self_wait();
            self.dispatch_wait(index, terminal);
        }
    }

    fn dispatch_wait(&self, index: usize, terminal: bool) {
        let runner = Arc::clone(&self.runners[index]);
        let deps: Vec<Arc<Mutex<JobHandle>>> = if terminal {
            Vec::new()
        } else {
            runner
                .expected()
                .iter()
                .filter(|id| **id != *runner.id())
                .filter_map(|id| self.by_id.get(id))
                .map(|&i| Arc::clone(self.runners[i].handle()))
                .collect()
        };
        let ctx = Arc::clone(&self.ctx);
        self.pools
            .wait
            .spawn(move || run_wait(ctx, runner, terminal, deps));
    }

    /// Counts finished steps; the instance completes when every step is
    /// done. Otherwise logs the current partition for progress visibility.
    fn on_done(&self, event: &JobEvent) -> Result<Option<i32>> {
        let done = self.done_count();
        let total = self.runners.len();
        tracing::info!("Step '{}' done ({}/{})", event.step_name, done, total);

        if done == total {
            return self.finish_success().map(Some);
        }

        let (running, waiting) = self.partition_counts();
        tracing::debug!(
            "Instance progress: {} done, {} running, {} waiting",
            done,
            running,
            waiting
        );
        Ok(None)
    }

    /// A terminal step failure stops the instance: every step still in
    /// WAITING is killed exactly once and the instance adopts the failing
    /// step's exit code.
    fn on_exit(&self, event: &JobEvent) -> Result<i32> {
        tracing::error!(
            "Step '{}' exited with code {}; stopping instance",
            event.step_name,
            event.exit_code
        );
        self.kill_waiting();
        self.finish_exited(event.exit_code)
    }

    fn kill_waiting(&self) {
        let mut doomed = Vec::new();
        for runner in &self.runners {
            let mut guard = lock(runner.handle());
            if guard.state != StepState::Waiting {
                continue;
            }
            if guard.mark_killed() {
                if let Some(job_id) = guard.scheduler_id {
                    doomed.push(job_id);
                }
                self.ctx.persist(&guard);
            }
        }
        if let Err(e) = self.ctx.gateway.kill(&doomed) {
            tracing::warn!("Failed to kill {} waiting job(s): {}", doomed.len(), e);
        }
    }

    fn finish_success(&self) -> Result<i32> {
        let instance_snapshot = lock(&self.instance).clone();
        let steps = self.step_snapshots();
        self.ctx
            .outputs
            .capture_workflow_outputs(&instance_snapshot, &steps)?;

        let mut instance = lock(&self.instance);
        instance.mark_finished(0);
        self.persist_instance(&instance);
        tracing::info!("Instance '{}' finished successfully", instance.name);
        Ok(0)
    }

    fn finish_exited(&self, code: i32) -> Result<i32> {
        let mut instance = lock(&self.instance);
        instance.mark_finished(code);
        self.persist_instance(&instance);
        Ok(code)
    }

    /// Force-terminates an unfinished instance and joins every worker.
    /// Safe to call after a completed `run` as well, where it only joins.
    pub fn shutdown(&self) {
        let unfinished = !lock(&self.instance).finished;
        if unfinished {
            let name = lock(&self.instance).name.clone();
            tracing::warn!("Shutting down instance '{}' before completion", name);
            self.kill_waiting();
            let mut instance = lock(&self.instance);
            instance.mark_finished(exit::SHUTDOWN);
            self.persist_instance(&instance);
        }
        self.pools.join_all();
    }

    pub fn instance_snapshot(&self) -> WorkflowInstance {
        lock(&self.instance).clone()
    }

    pub fn step_snapshots(&self) -> Vec<JobHandle> {
        self.runners
            .iter()
            .map(|runner| lock(runner.handle()).clone())
            .collect()
    }

    fn done_count(&self) -> usize {
        self.runners
            .iter()
            .filter(|r| r.state() == StepState::Done)
            .count()
    }

    fn partition_counts(&self) -> (usize, usize) {
        let mut running = 0;
        let mut waiting = 0;
        for runner in &self.runners {
            match runner.state() {
                StepState::Running => running += 1,
                StepState::Waiting => waiting += 1,
                _ => {}
            }
        }
        (running, waiting)
    }

    fn persist_instance(&self, instance: &WorkflowInstance) {
        if let Err(e) = self.ctx.store.save_instance(instance) {
            tracing::warn!("Failed to persist instance '{}': {}", instance.name, e);
        }
    }
}
