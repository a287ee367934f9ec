use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_RETRY: u32 = 1;

/// Raw per-step execution configuration as it appears in TOML. All fields
/// are optional; unset fields fall back to `[defaults]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepExecConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_failure_script: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<bool>,
}

/// Execution configuration for a whole run:
///
/// ```toml
/// [defaults]
/// retry = 2
/// timeout_secs = 600
///
/// [step.align]
/// post_failure_script = "/opt/ops/requeue.sh"
/// retry = 3
/// container = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub defaults: StepExecConfig,
    #[serde(default)]
    pub step: HashMap<String, StepExecConfig>,
}

/// Fully resolved view for one step, after merging with `[defaults]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProfile {
    pub post_failure_script: Option<PathBuf>,
    pub retry: u32,
    pub timeout: Option<Duration>,
    pub container_enabled: bool,
}

impl ExecutionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ExecConfigNotFound(path.to_path_buf()));
        }
        let raw = fs_err::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn profile(&self, step_name: &str) -> StepProfile {
        let step = self.step.get(step_name);
        let pick = |f: fn(&StepExecConfig) -> Option<PathBuf>| {
            step.and_then(f).or_else(|| f(&self.defaults))
        };

        StepProfile {
            post_failure_script: pick(|c| c.post_failure_script.clone()),
            retry: step
                .and_then(|c| c.retry)
                .or(self.defaults.retry)
                .unwrap_or(DEFAULT_RETRY),
            timeout: step
                .and_then(|c| c.timeout_secs)
                .or(self.defaults.timeout_secs)
                .map(Duration::from_secs),
            container_enabled: step
                .and_then(|c| c.container)
                .or(self.defaults.container)
                .unwrap_or(false),
        }
    }
}
