use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scheduler call '{command}' did not execute: {reason}")]
    NotExecuted { command: String, reason: String },

    #[error("Submission failed with exit code {exit_code}: {stderr}")]
    SubmitFailed { exit_code: i32, stderr: String },

    #[error("Failed to parse scheduler job id from submit output: {0}")]
    JobIdParse(String),

    #[error("Wait failed with exit code {exit_code}: {stderr}")]
    WaitFailed { exit_code: i32, stderr: String },

    #[error("Scheduler command '{command}' failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Cannot run an empty command line.")]
    EmptyCommand,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
