use crate::error::Result;
use std::fmt;
use std::path::PathBuf;

/// Scheduler-side view of a job, as reported by the queue query command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SchedulerJobState {
    Pending,
    Running,
    Suspended,
    Done,
    Exited,
    Unknown,
}

impl fmt::Display for SchedulerJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerJobState::Pending => write!(f, "pending"),
            SchedulerJobState::Running => write!(f, "running"),
            SchedulerJobState::Suspended => write!(f, "suspended"),
            SchedulerJobState::Done => write!(f, "done"),
            SchedulerJobState::Exited => write!(f, "exited"),
            SchedulerJobState::Unknown => write!(f, "unknown"),
        }
    }
}

/// One submission to the external scheduler.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub argv: Vec<String>,
    pub job_name: String,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Submit the job in a held state; it will not run until resumed.
    pub hold: bool,
}

impl SubmitRequest {
    pub fn new(argv: Vec<String>, job_name: impl Into<String>) -> Self {
        SubmitRequest {
            argv,
            job_name: job_name.into(),
            env: Vec::new(),
            cwd: None,
            hold: false,
        }
    }

    pub fn held(mut self) -> Self {
        self.hold = true;
        self
    }
}

/// Thin synchronous wrapper around the external batch scheduler's CLI.
/// Every method blocks the calling thread for the duration of the
/// underlying scheduler command.
pub trait SchedulerGateway: Send + Sync {
    /// Submits a job and returns the scheduler job id parsed from the
    /// submit command's stdout.
    fn submit(&self, request: &SubmitRequest) -> Result<u64>;

    /// Blocks until every listed job has completed successfully. Requests
    /// are paged internally; the first failing page's exit code is
    /// reported via `GatewayError::WaitFailed`.
    fn wait(&self, job_ids: &[u64]) -> Result<()>;

    /// Releases a held job.
    fn resume(&self, job_id: u64) -> Result<()>;

    fn kill(&self, job_ids: &[u64]) -> Result<()>;

    fn query_state(&self, job_id: u64) -> Result<SchedulerJobState>;

    fn query_exit_code(&self, job_id: u64) -> Result<i32>;
}
