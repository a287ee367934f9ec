use crate::model::StepId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Execution configuration not found at '{0}'.")]
    ExecConfigNotFound(PathBuf),
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Step '{0}' not found in the workflow instance.")]
    StepNotFound(StepId),

    #[error("Duplicate step id '{0}' in the workflow instance.")]
    DuplicateStepId(StepId),

    #[error("Step '{step}' references unknown dependency '{dependency}'.")]
    UnknownDependency { step: StepId, dependency: String },

    #[error("Step '{0}' has no scheduler job id; it was never submitted.")]
    NotSubmitted(StepId),

    #[error("Workflow instance '{0}' contains no steps.")]
    EmptyWorkflow(String),

    #[error("Workflow instance '{0}' is already finished.")]
    InstanceFinished(String),
}
