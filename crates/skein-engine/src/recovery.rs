use crate::context::EngineContext;
use skein_core::constants::recovery_env;
use skein_core::model::JobHandle;
use skein_scheduler::process;

/// What became of one post-failure recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No post-failure script is configured for this step.
    NotConfigured,
    /// The script succeeded and a re-wait on the original job completed;
    /// the step counts as done.
    Recovered,
    /// Recovery was abandoned or every retry was exhausted; the original
    /// failure stands.
    Unrecovered { exit_code: i32 },
}

/// Runs the configured post-failure script for a failed step, then
/// re-waits on the original scheduler job. The script is retried up to the
/// step's retry budget, but a script that itself fails (or cannot be run)
/// abandons recovery immediately: an operator script that errors out is a
/// stronger signal than the job failure it was meant to repair.
pub(crate) fn attempt(ctx: &EngineContext, failed: &JobHandle, exit_code: i32) -> RecoveryOutcome {
    let profile = ctx.exec_config.profile(&failed.name);
    let Some(script) = profile.post_failure_script else {
        return RecoveryOutcome::NotConfigured;
    };
    let Some(job_id) = failed.scheduler_id else {
        return RecoveryOutcome::Unrecovered { exit_code };
    };

    let argv = vec![script.to_string_lossy().to_string()];
    let command_line = failed.built_command.join(" ");
    let resource_request = extract_resource_request(&failed.built_command);

    for retry_index in 0..profile.retry {
        tracing::info!(
            "Running post-failure script for step '{}' (attempt {}/{})",
            failed.name,
            retry_index + 1,
            profile.retry
        );
        let envs = vec![
            (recovery_env::JOB_ID.to_string(), job_id.to_string()),
            (recovery_env::JOB_COMMAND.to_string(), command_line.clone()),
            (
                recovery_env::JOB_CWD.to_string(),
                failed.work_dir.to_string_lossy().to_string(),
            ),
            (
                recovery_env::JOB_OUTDIR.to_string(),
                failed.output_dir.to_string_lossy().to_string(),
            ),
            (
                recovery_env::JOB_RESREQ.to_string(),
                resource_request.clone(),
            ),
            (
                recovery_env::RETRY_INDEX.to_string(),
                retry_index.to_string(),
            ),
        ];

        let output = match process::run(&argv, &envs, Some(&failed.work_dir), profile.timeout) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    "Post-failure script for step '{}' could not be run: {}",
                    failed.name,
                    e
                );
                return RecoveryOutcome::Unrecovered { exit_code };
            }
        };
        if !output.executed {
            tracing::warn!(
                "Post-failure script for step '{}' did not execute: {}",
                failed.name,
                output.stderr
            );
            return RecoveryOutcome::Unrecovered { exit_code };
        }
        if output.exit_code != 0 {
            tracing::warn!(
                "Post-failure script for step '{}' exited with code {}; abandoning recovery",
                failed.name,
                output.exit_code
            );
            return RecoveryOutcome::Unrecovered { exit_code };
        }

        match ctx.gateway.wait(&[job_id]) {
            Ok(()) => {
                tracing::info!("Step '{}' recovered after failure", failed.name);
                return RecoveryOutcome::Recovered;
            }
            Err(e) => {
                tracing::debug!(
                    "Re-wait on job {} for step '{}' failed: {}",
                    job_id,
                    failed.name,
                    e
                );
            }
        }
    }

    tracing::warn!(
        "Recovery for step '{}' exhausted after {} attempts",
        failed.name,
        profile.retry
    );
    RecoveryOutcome::Unrecovered { exit_code }
}

/// Collects the values of `-R` resource-requirement flags from a built
/// command line, so the recovery script can resubmit with equivalent
/// resources.
pub(crate) fn extract_resource_request(argv: &[String]) -> String {
    let mut parts = Vec::new();
    let mut iter = argv.iter();
    while let Some(arg) = iter.next() {
        if arg == "-R" {
            if let Some(value) = iter.next() {
                parts.push(value.clone());
            }
        } else if let Some(rest) = arg.strip_prefix("-R") {
            if !rest.is_empty() {
                parts.push(rest.to_string());
            }
        }
    }
    parts.join(" ")
}
