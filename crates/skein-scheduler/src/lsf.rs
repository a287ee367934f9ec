use crate::error::{GatewayError, Result};
use crate::gateway::{SchedulerGateway, SchedulerJobState, SubmitRequest};
use crate::process::{self, ProcessOutput};
use once_cell::sync::Lazy;
use regex::Regex;
use skein_core::constants::wait;
use std::time::Duration;

/// Submit output looks like: `Job <1234> is submitted to queue <normal>.`
static JOB_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"Job <(\d+)>").expect("job id pattern is valid")
});

/// Gateway speaking the LSF command-line dialect: `bsub`, `bwait`,
/// `bresume`, `bkill`, `bjobs`.
#[derive(Debug, Clone, Default)]
pub struct LsfGateway {
    timeout: Option<Duration>,
}

impl LsfGateway {
    pub fn new(timeout: Option<Duration>) -> Self {
        LsfGateway { timeout }
    }

    fn run(&self, argv: Vec<String>, env: &[(String, String)]) -> Result<ProcessOutput> {
        process::run(&argv, env, None, self.timeout)
    }

    fn run_checked(&self, argv: Vec<String>) -> Result<ProcessOutput> {
        let command = argv.join(" ");
        let out = self.run(argv, &[])?;
        if !out.executed {
            return Err(GatewayError::NotExecuted {
                command,
                reason: out.stderr,
            });
        }
        if out.exit_code != 0 {
            return Err(GatewayError::CommandFailed {
                command,
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        Ok(out)
    }
}

pub(crate) fn parse_job_id(stdout: &str) -> Option<u64> {
    JOB_ID_PATTERN
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub(crate) fn wait_expression(page: &[u64]) -> String {
    page.iter()
        .map(|id| format!("done({})", id))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn parse_state(stat: &str) -> SchedulerJobState {
    match stat.trim() {
        "PEND" | "WAIT" | "PROV" => SchedulerJobState::Pending,
        "RUN" => SchedulerJobState::Running,
        "PSUSP" | "USUSP" | "SSUSP" => SchedulerJobState::Suspended,
        "DONE" => SchedulerJobState::Done,
        "EXIT" => SchedulerJobState::Exited,
        _ => SchedulerJobState::Unknown,
    }
}

impl SchedulerGateway for LsfGateway {
    fn submit(&self, request: &SubmitRequest) -> Result<u64> {
        let mut argv = vec!["bsub".to_string()];
        if request.hold {
            argv.push("-H".to_string());
        }
        if !request.job_name.is_empty() {
            argv.push("-J".to_string());
            argv.push(request.job_name.clone());
        }
        if let Some(cwd) = &request.cwd {
            argv.push("-cwd".to_string());
            argv.push(cwd.to_string_lossy().to_string());
        }
        argv.extend(request.argv.iter().cloned());

        let command = argv.join(" ");
        let out = self.run(argv, &request.env)?;
        if !out.executed {
            return Err(GatewayError::NotExecuted {
                command,
                reason: out.stderr,
            });
        }
        if out.exit_code != 0 {
            return Err(GatewayError::SubmitFailed {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        parse_job_id(&out.stdout).ok_or(GatewayError::JobIdParse(out.stdout))
    }

    fn wait(&self, job_ids: &[u64]) -> Result<()> {
        for page in job_ids.chunks(wait::PAGE_SIZE) {
            let argv = vec![
                "bwait".to_string(),
                "-w".to_string(),
                wait_expression(page),
            ];
            let command = argv.join(" ");
            let out = self.run(argv, &[])?;
            if !out.executed {
                return Err(GatewayError::NotExecuted {
                    command,
                    reason: out.stderr,
                });
            }
            if out.exit_code != 0 {
                return Err(GatewayError::WaitFailed {
                    exit_code: out.exit_code,
                    stderr: out.stderr,
                });
            }
        }
        Ok(())
    }

    fn resume(&self, job_id: u64) -> Result<()> {
        self.run_checked(vec!["bresume".to_string(), job_id.to_string()])?;
        Ok(())
    }

    fn kill(&self, job_ids: &[u64]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["bkill".to_string()];
        argv.extend(job_ids.iter().map(|id| id.to_string()));
        self.run_checked(argv)?;
        Ok(())
    }

    fn query_state(&self, job_id: u64) -> Result<SchedulerJobState> {
        let out = self.run_checked(vec![
            "bjobs".to_string(),
            "-noheader".to_string(),
            "-o".to_string(),
            "stat".to_string(),
            job_id.to_string(),
        ])?;
        Ok(parse_state(&out.stdout))
    }

    fn query_exit_code(&self, job_id: u64) -> Result<i32> {
        let out = self.run_checked(vec![
            "bjobs".to_string(),
            "-noheader".to_string(),
            "-o".to_string(),
            "exit_code".to_string(),
            job_id.to_string(),
        ])?;
        let field = out.stdout.trim();
        // LSF prints '-' for jobs that finished with code 0.
        if field.is_empty() || field == "-" {
            return Ok(0);
        }
        field
            .parse()
            .map_err(|_| GatewayError::JobIdParse(field.to_string()))
    }
}
