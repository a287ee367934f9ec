use skein_core::errors::{ConfigError, DomainError};
use skein_core::model::StepId;
use skein_scheduler::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command builder failed for step '{step}': {reason}")]
    CommandBuild { step: StepId, reason: String },

    #[error("Output capture failed for '{target}': {reason}")]
    OutputCapture { target: String, reason: String },

    #[error("Scatter submission #{index} for step '{step}' failed: {reason}")]
    ScatterSubmitFailed {
        step: StepId,
        index: usize,
        reason: String,
    },

    #[error("Worker thread panicked: {0}")]
    WorkerPanic(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
