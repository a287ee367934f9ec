use crate::context::{lock, EngineContext};
use crate::error::{EngineError, Result};
use crate::runner::StepRunner;
use crate::scatter;
use skein_core::constants::exit;
use skein_core::model::{JobEvent, JobHandle};
use skein_scheduler::{GatewayError, SubmitRequest};
use std::sync::{Arc, Mutex};

/// Entry point for one submission worker. Ready steps submit their built
/// command directly; scattered ready steps hand off to the scatter
/// coordinator; everything else submits a held placeholder to obtain a
/// scheduler id up front.
pub(crate) fn run_submission(ctx: Arc<EngineContext>, runner: Arc<StepRunner>) {
    let (ready, scattered) = {
        let guard = lock(runner.handle());
        (guard.ready_to_run, guard.scatter.is_some())
    };

    if ready && scattered {
        match scatter::run_scatter(&ctx, runner.handle()) {
            Ok(job_id) => {
                let mut guard = lock(runner.handle());
                guard.assign_scheduler_id(job_id);
                start_running(&ctx, &mut guard);
            }
            Err(e) => fail_step(&ctx, runner.handle(), failure_exit_code(&e), &e),
        }
        return;
    }

    let submitted = submit_one(&ctx, runner.handle(), ready);
    match submitted {
        Ok(job_id) => {
            let mut guard = lock(runner.handle());
            guard.assign_scheduler_id(job_id);
            if ready {
                start_running(&ctx, &mut guard);
            } else {
                tracing::debug!(
                    "Step '{}' submitted as held placeholder job {}",
                    guard.name,
                    job_id
                );
                ctx.persist(&guard);
            }
        }
        Err(e) => fail_step(&ctx, runner.handle(), failure_exit_code(&e), &e),
    }
}

fn submit_one(ctx: &EngineContext, handle: &Arc<Mutex<JobHandle>>, ready: bool) -> Result<u64> {
    let request = {
        let guard = lock(handle);
        let argv = if ready {
            guard.built_command.clone()
        } else {
            ctx.builder.build_placeholder_command(&guard)?
        };
        let mut request = SubmitRequest::new(argv, guard.name.clone());
        request.cwd = Some(guard.work_dir.clone());
        if !ready {
            request = request.held();
        }
        request
    };
    Ok(ctx.gateway.submit(&request)?)
}

/// Marks a step running, persists it, and broadcasts its START event.
pub(crate) fn start_running(ctx: &EngineContext, handle: &mut JobHandle) {
    if handle.mark_running() {
        tracing::debug!(
            "Step '{}' is running as scheduler job {:?}",
            handle.name,
            handle.scheduler_id
        );
        ctx.persist(handle);
        ctx.emit(JobEvent::start(handle.id.clone(), handle.name.clone()));
    }
}

/// Records a terminal failure on a step and broadcasts its EXIT event.
pub(crate) fn fail_step(
    ctx: &EngineContext,
    handle: &Arc<Mutex<JobHandle>>,
    code: i32,
    cause: &EngineError,
) {
    let mut guard = lock(handle);
    tracing::error!("Step '{}' failed: {}", guard.name, cause);
    if guard.mark_exited(code) {
        ctx.persist(&guard);
    }
    ctx.emit(JobEvent::exit(guard.id.clone(), guard.name.clone(), code));
}

/// Exit code reported for a step whose scheduler interaction failed. A
/// submit or wait command that ran carries its own code; a call that never
/// executed is reported as the submit-failure sentinel.
pub(crate) fn failure_exit_code(err: &EngineError) -> i32 {
    match err {
        EngineError::Gateway(GatewayError::SubmitFailed { exit_code, .. }) if *exit_code != 0 => {
            *exit_code
        }
        EngineError::Gateway(GatewayError::WaitFailed { exit_code, .. }) if *exit_code != 0 => {
            *exit_code
        }
        _ => exit::SUBMIT_FAILURE,
    }
}
