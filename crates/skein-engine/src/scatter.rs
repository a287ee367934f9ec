use crate::context::{lock, EngineContext};
use crate::error::{EngineError, Result};
use skein_core::model::JobHandle;
use skein_scheduler::{GatewayError, SubmitRequest};
use std::sync::{Arc, Mutex};
use std::thread;

/// A one-shot job whose only effect is to exit with `code`. Used to fold a
/// whole scatter fan-in back into the single job id the rest of the engine
/// expects per step.
pub(crate) fn synthetic_exit_command(code: i32) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("exit {}", code),
    ]
}

/// Coordinates one scattered step: fans the sub-commands out as parallel
/// submissions, waits for all of them, then submits a synthetic result job
/// carrying the aggregate exit code. Returns the synthetic job's id, which
/// becomes the step's scheduler id.
pub(crate) fn run_scatter(
    ctx: &Arc<EngineContext>,
    handle: &Arc<Mutex<JobHandle>>,
) -> Result<u64> {
    let snapshot = lock(handle).clone();
    let bundle = ctx.builder.build_scatter_bundle(&snapshot)?;

    if bundle.is_empty() {
        tracing::debug!(
            "Step '{}' scatters over an empty collection; substituting a no-op job",
            snapshot.name
        );
        return submit_result_job(ctx, &snapshot, 0);
    }

    tracing::info!(
        "Scattering step '{}' into {} submissions",
        snapshot.name,
        bundle.len()
    );

    let mut workers = Vec::with_capacity(bundle.len());
    for (index, argv) in bundle.commands.iter().cloned().enumerate() {
        let ctx = Arc::clone(ctx);
        let job_name = format!("{}-scatter-{}", snapshot.name, index);
        let cwd = snapshot.work_dir.clone();
        workers.push((
            index,
            thread::spawn(move || -> Result<u64> {
                let mut request = SubmitRequest::new(argv, job_name);
                request.cwd = Some(cwd);
                Ok(ctx.gateway.submit(&request)?)
            }),
        ));
    }

    let mut sub_ids = Vec::with_capacity(workers.len());
    let mut first_failure: Option<EngineError> = None;
    for (index, worker) in workers {
        match worker.join() {
            Ok(Ok(job_id)) => sub_ids.push(job_id),
            Ok(Err(e)) => {
                if first_failure.is_none() {
                    first_failure = Some(EngineError::ScatterSubmitFailed {
                        step: snapshot.id.clone(),
                        index,
                        reason: e.to_string(),
                    });
                }
            }
            Err(_) => {
                if first_failure.is_none() {
                    first_failure = Some(EngineError::WorkerPanic(format!(
                        "scatter submission #{} for step '{}'",
                        index, snapshot.name
                    )));
                }
            }
        }
    }
    {
        let mut guard = lock(handle);
        guard.scatter_job_ids = sub_ids.clone();
        ctx.persist(&guard);
    }

    // A failed sub-submission is immediately fatal for the whole step;
    // the siblings that did submit must not be left running.
    if let Some(e) = first_failure {
        kill_sub_jobs(ctx, &snapshot, &sub_ids);
        return Err(e);
    }

    let code = match ctx.gateway.wait(&sub_ids) {
        Ok(()) => 0,
        Err(GatewayError::WaitFailed { exit_code, .. }) => {
            // Jobs in pages after the failing one may still be running.
            kill_sub_jobs(ctx, &snapshot, &sub_ids);
            exit_code
        }
        Err(e) => return Err(e.into()),
    };

    submit_result_job(ctx, &snapshot, code)
}

fn kill_sub_jobs(ctx: &EngineContext, snapshot: &JobHandle, sub_ids: &[u64]) {
    if sub_ids.is_empty() {
        return;
    }
    if let Err(e) = ctx.gateway.kill(sub_ids) {
        tracing::warn!(
            "Failed to kill {} scatter submission(s) for step '{}': {}",
            sub_ids.len(),
            snapshot.name,
            e
        );
    }
}

fn submit_result_job(ctx: &EngineContext, snapshot: &JobHandle, code: i32) -> Result<u64> {
    let mut request = SubmitRequest::new(
        synthetic_exit_command(code),
        format!("{}-gather", snapshot.name),
    );
    request.cwd = Some(snapshot.work_dir.clone());
    Ok(ctx.gateway.submit(&request)?)
}
