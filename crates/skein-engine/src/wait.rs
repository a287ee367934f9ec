use crate::context::{lock, EngineContext};
use crate::error::Result;
use crate::recovery::{self, RecoveryOutcome};
use crate::runner::StepRunner;
use crate::submit::{fail_step, failure_exit_code, start_running};
use skein_core::constants::{container, markers};
use skein_core::errors::DomainError;
use skein_core::model::{JobEvent, JobHandle, StepState};
use skein_scheduler::{GatewayError, SchedulerJobState, SubmitRequest};
use std::sync::{Arc, Mutex};

/// Entry point for one wait worker. A terminal wait covers the runner's
/// own job; a dependency wait covers the finished-START dependencies and,
/// on success, materializes the runner's held placeholder into its real
/// command.
pub(crate) fn run_wait(
    ctx: Arc<EngineContext>,
    runner: Arc<StepRunner>,
    terminal: bool,
    deps: Vec<Arc<Mutex<JobHandle>>>,
) {
    if let Err(e) = wait_inner(&ctx, &runner, terminal, &deps) {
        fail_step(&ctx, runner.handle(), failure_exit_code(&e), &e);
    }
}

fn wait_inner(
    ctx: &EngineContext,
    runner: &StepRunner,
    terminal: bool,
    deps: &[Arc<Mutex<JobHandle>>],
) -> Result<()> {
    let targets: Vec<Arc<Mutex<JobHandle>>> = if terminal || deps.is_empty() {
        vec![Arc::clone(runner.handle())]
    } else {
        deps.to_vec()
    };

    let mut job_ids = Vec::with_capacity(targets.len());
    for target in &targets {
        let guard = lock(target);
        let job_id = guard
            .scheduler_id
            .ok_or_else(|| DomainError::NotSubmitted(guard.id.clone()))?;
        job_ids.push(job_id);
    }

    match ctx.gateway.wait(&job_ids) {
        Ok(()) => {}
        Err(GatewayError::WaitFailed { .. }) => {
            if !recover_failures(ctx, runner, terminal, &targets)? {
                // Terminal failure already broadcast.
                return Ok(());
            }
        }
        Err(e) => return Err(e.into()),
    }

    for target in &targets {
        finalize_done(ctx, target)?;
    }
    if !terminal && !deps.is_empty() {
        materialize(ctx, runner, deps)?;
    }
    Ok(())
}

/// Marks one job done, capturing its outputs first. The handle lock is
/// held across the capture, so a step waited on by several dependents is
/// captured and announced exactly once; the output marker additionally
/// short-circuits capture for steps finished in an earlier run.
fn finalize_done(ctx: &EngineContext, handle: &Arc<Mutex<JobHandle>>) -> Result<()> {
    let mut guard = lock(handle);
    if guard.state == StepState::Done {
        return Ok(());
    }

    let marker = guard
        .work_dir
        .join(markers::ENGINE_DIR)
        .join(markers::OUTPUTS);
    if !marker.exists() {
        ctx.outputs.capture_step_outputs(&guard)?;
    }

    if guard.mark_done() {
        tracing::debug!("Step '{}' is done", guard.name);
        ctx.persist(&guard);
        ctx.emit(JobEvent::done(guard.id.clone(), guard.name.clone()));
    }
    Ok(())
}

/// Turns the runner's held placeholder into its real command now that
/// every dependency has finished. Container-enabled steps cannot reuse the
/// placeholder (the container wrapper must be the job's entry point), so
/// the placeholder is killed and a fresh job submitted; its new id
/// supersedes the old one. Plain steps have their wrapper script rewritten
/// in place and the held job resumed.
fn materialize(
    ctx: &EngineContext,
    runner: &StepRunner,
    deps: &[Arc<Mutex<JobHandle>>],
) -> Result<()> {
    let dep_snapshots: Vec<JobHandle> = deps.iter().map(|d| lock(d).clone()).collect();

    let (snapshot, held_id, profile) = {
        let mut guard = lock(runner.handle());
        ctx.builder.bind_step_inputs(&mut guard, &dep_snapshots)?;
        guard.built_command = ctx.builder.build_final_command(&guard)?;
        guard.ready_to_run = true;
        let held_id = guard
            .scheduler_id
            .ok_or_else(|| DomainError::NotSubmitted(guard.id.clone()))?;
        let profile = ctx.exec_config.profile(&guard.name);
        (guard.clone(), held_id, profile)
    };

    if profile.container_enabled && snapshot.container_image.is_some() {
        tracing::debug!(
            "Replacing held job {} for container step '{}'",
            held_id,
            snapshot.name
        );
        ctx.gateway.kill(&[held_id])?;
        let mut request =
            SubmitRequest::new(snapshot.built_command.clone(), snapshot.name.clone());
        request.cwd = Some(snapshot.work_dir.clone());
        if let Some(image) = &snapshot.container_image {
            request
                .env
                .push((container::IMAGE_ENV.to_string(), image.clone()));
        }
        let new_id = ctx.gateway.submit(&request)?;
        lock(runner.handle()).assign_scheduler_id(new_id);
    } else {
        fill_wrapper_script(&snapshot)?;
        ctx.gateway.resume(held_id)?;
    }

    let mut guard = lock(runner.handle());
    start_running(ctx, &mut guard);
    Ok(())
}

/// Rewrites the placeholder's wrapper script with the real command. The
/// held job has not started, so the rewrite is race-free.
fn fill_wrapper_script(snapshot: &JobHandle) -> Result<()> {
    if let Some(parent) = snapshot.script_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }
    fs_err::write(&snapshot.script_path, render_script(&snapshot.built_command))?;
    Ok(())
}

fn render_script(argv: &[String]) -> String {
    format!("#!/bin/sh\n{}\n", shell_join(argv))
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Handles a failed wait: settles each waited job individually, accepts
/// declared success codes, and runs post-failure recovery for the rest.
/// Returns true when every job ended up successful or recovered; returns
/// false after broadcasting the EXIT of the first unrecoverable job.
///
/// A failed page only proves that *some* covered job failed; the others
/// may still be pending or running, in which case their exit-code query
/// would report a meaningless zero. Only jobs the scheduler reports
/// terminal have their code inspected; the rest get a dedicated wait
/// before anything is concluded about them.
fn recover_failures(
    ctx: &EngineContext,
    runner: &StepRunner,
    terminal: bool,
    targets: &[Arc<Mutex<JobHandle>>],
) -> Result<bool> {
    for target in targets {
        let snapshot = lock(target).clone();
        if snapshot.state == StepState::Done {
            continue;
        }
        let job_id = snapshot
            .scheduler_id
            .ok_or_else(|| DomainError::NotSubmitted(snapshot.id.clone()))?;

        let code = match ctx.gateway.query_state(job_id)? {
            SchedulerJobState::Done => continue,
            SchedulerJobState::Exited => ctx.gateway.query_exit_code(job_id)?,
            state => {
                tracing::debug!(
                    "Job {} for step '{}' is still {} after a failed page; waiting it out",
                    job_id,
                    snapshot.name,
                    state
                );
                match ctx.gateway.wait(&[job_id]) {
                    Ok(()) => continue,
                    Err(GatewayError::WaitFailed { .. }) => ctx.gateway.query_exit_code(job_id)?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        if snapshot.is_success_code(code) {
            tracing::debug!(
                "Step '{}' exited with declared success code {}",
                snapshot.name,
                code
            );
            continue;
        }

        match recovery::attempt(ctx, &snapshot, code) {
            RecoveryOutcome::Recovered => {}
            RecoveryOutcome::NotConfigured | RecoveryOutcome::Unrecovered { .. } => {
                if terminal {
                    tracing::error!(
                        "Terminal step '{}' failed with exit code {}",
                        snapshot.name,
                        code
                    );
                } else {
                    tracing::error!(
                        "Dependency '{}' of step '{}' failed with exit code {}",
                        snapshot.name,
                        runner.name(),
                        code
                    );
                }
                let mut guard = lock(target);
                if guard.mark_exited(code) {
                    ctx.persist(&guard);
                }
                ctx.emit(JobEvent::exit(guard.id.clone(), guard.name.clone(), code));
                return Ok(false);
            }
        }
    }
    Ok(true)
}
