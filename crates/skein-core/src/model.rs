use crate::constants::exit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct StepId(pub String);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        StepId(s)
    }
}

impl FromStr for StepId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StepId(s.to_string()))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn fresh() -> Self {
        InstanceId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        InstanceId(s)
    }
}

/// Lifecycle of one scheduled step. Transitions are monotonic:
/// `Waiting -> Running -> {Done | Exited}`, with `Killed` reachable only
/// from `Waiting` during orchestrator shutdown. `Done`, `Exited` and
/// `Killed` are absorbing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    Waiting,
    Running,
    Done,
    Exited,
    Killed,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Done | StepState::Exited | StepState::Killed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepState::Exited | StepState::Killed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Waiting => write!(f, "waiting"),
            StepState::Running => write!(f, "running"),
            StepState::Done => write!(f, "done"),
            StepState::Exited => write!(f, "exited"),
            StepState::Killed => write!(f, "killed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStepStateError(pub String);

impl fmt::Display for ParseStepStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid step state: '{}'. Valid values are: waiting, running, done, exited, killed",
            self.0
        )
    }
}

impl std::error::Error for ParseStepStateError {}

impl FromStr for StepState {
    type Err = ParseStepStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(StepState::Waiting),
            "running" => Ok(StepState::Running),
            "done" => Ok(StepState::Done),
            "exited" => Ok(StepState::Exited),
            "killed" => Ok(StepState::Killed),
            _ => Err(ParseStepStateError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    #[default]
    CommandLineTool,
    ExpressionTool,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::CommandLineTool => write!(f, "command-line-tool"),
            StepKind::ExpressionTool => write!(f, "expression-tool"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    #[default]
    Tool,
    Workflow,
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKind::Tool => write!(f, "tool"),
            InstanceKind::Workflow => write!(f, "workflow"),
        }
    }
}

/// Ordered sub-command bundles produced for one scattered step. Each entry
/// becomes an independent scheduler submission; `empty_scatter` records that
/// the scatter source collection was empty, in which case a single no-op
/// success job is substituted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScatterBundle {
    pub commands: Vec<Vec<String>>,
    #[serde(default)]
    pub empty_scatter: bool,
}

impl ScatterBundle {
    pub fn empty() -> Self {
        ScatterBundle {
            commands: Vec::new(),
            empty_scatter: true,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.empty_scatter || self.commands.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEventKind {
    Start,
    Done,
    Exit,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEventKind::Start => write!(f, "start"),
            JobEventKind::Done => write!(f, "done"),
            JobEventKind::Exit => write!(f, "exit"),
        }
    }
}

/// Short-lived broadcast value, consumed exactly once by the orchestrator's
/// dispatcher. START means the step's real command has begun executing (or
/// its placeholder was submitted and needs no further input); DONE means its
/// output has been fully captured; EXIT means terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub step_id: StepId,
    pub step_name: String,
    pub exit_code: i32,
}

impl JobEvent {
    pub fn start(step_id: StepId, step_name: impl Into<String>) -> Self {
        JobEvent {
            kind: JobEventKind::Start,
            step_id,
            step_name: step_name.into(),
            exit_code: 0,
        }
    }

    pub fn done(step_id: StepId, step_name: impl Into<String>) -> Self {
        JobEvent {
            kind: JobEventKind::Done,
            step_id,
            step_name: step_name.into(),
            exit_code: 0,
        }
    }

    pub fn exit(step_id: StepId, step_name: impl Into<String>, exit_code: i32) -> Self {
        JobEvent {
            kind: JobEventKind::Exit,
            step_id,
            step_name: step_name.into(),
            exit_code,
        }
    }
}

/// Runtime record for one submitted (or about-to-be-submitted) unit of
/// scheduler work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: StepId,
    pub name: String,
    #[serde(default)]
    pub kind: StepKind,
    #[serde(default)]
    pub state: StepState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// `exit::UNSET` until the scheduler reports a terminal code.
    pub exit_code: i32,
    /// Current scheduler job id. Set at most once per physical submission;
    /// a resubmission supersedes the old id, which is never waited on again.
    pub scheduler_id: Option<u64>,
    #[serde(default)]
    pub superseded_ids: Vec<u64>,
    /// True once every step-input binding has resolved to a concrete value.
    #[serde(default)]
    pub ready_to_run: bool,
    /// Literal argv, owned by the command-building collaborator.
    #[serde(default)]
    pub built_command: Vec<String>,
    /// Wrapper script a held placeholder executes; binding fills it in place.
    pub script_path: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Names of sibling steps this step's unresolved bindings reference.
    #[serde(default)]
    pub pending_inputs: Vec<String>,
    /// Exit codes the tool declares as success. Defaults to `{0}`.
    #[serde(default = "default_success_codes")]
    pub success_codes: HashSet<i32>,
    pub container_image: Option<String>,
    pub scatter: Option<ScatterBundle>,
    #[serde(default)]
    pub scatter_job_ids: Vec<u64>,
}

fn default_success_codes() -> HashSet<i32> {
    HashSet::from([0])
}

impl JobHandle {
    pub fn new(id: StepId, name: impl Into<String>, kind: StepKind) -> Self {
        JobHandle {
            id,
            name: name.into(),
            kind,
            state: StepState::Waiting,
            start_time: None,
            end_time: None,
            exit_code: exit::UNSET,
            scheduler_id: None,
            superseded_ids: Vec::new(),
            ready_to_run: false,
            built_command: Vec::new(),
            script_path: PathBuf::new(),
            work_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            pending_inputs: Vec::new(),
            success_codes: default_success_codes(),
            container_image: None,
            scatter: None,
            scatter_job_ids: Vec::new(),
        }
    }

    /// Records a fresh physical submission. Any previous id is superseded
    /// and must never be waited on again.
    pub fn assign_scheduler_id(&mut self, job_id: u64) {
        if let Some(old) = self.scheduler_id.replace(job_id) {
            self.superseded_ids.push(old);
        }
    }

    pub fn is_success_code(&self, code: i32) -> bool {
        self.success_codes.contains(&code)
    }

    /// `Waiting -> Running`. Returns false if the handle is already past
    /// this transition.
    pub fn mark_running(&mut self) -> bool {
        if self.state != StepState::Waiting {
            return false;
        }
        self.state = StepState::Running;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        true
    }

    pub fn mark_done(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = StepState::Done;
        self.end_time = Some(Utc::now());
        if self.exit_code == exit::UNSET {
            self.exit_code = 0;
        }
        true
    }

    pub fn mark_exited(&mut self, code: i32) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = StepState::Exited;
        self.exit_code = code;
        self.end_time = Some(Utc::now());
        true
    }

    /// Reachable only from `Waiting` during orchestrator shutdown.
    pub fn mark_killed(&mut self) -> bool {
        if self.state != StepState::Waiting {
            return false;
        }
        self.state = StepState::Killed;
        self.end_time = Some(Utc::now());
        true
    }
}

/// One top-level submission: a single tool or every step of a (possibly
/// nested) workflow, flattened to leaf command instances for scheduling.
/// Mutated in place by the orchestrator, immutable once `finished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub kind: InstanceKind,
    pub exit_code: i32,
    #[serde(default)]
    pub finished: bool,
}

impl WorkflowInstance {
    pub fn new(name: impl Into<String>, kind: InstanceKind) -> Self {
        WorkflowInstance {
            id: InstanceId::fresh(),
            name: name.into(),
            kind,
            exit_code: exit::UNSET,
            finished: false,
        }
    }

    pub fn mark_finished(&mut self, exit_code: i32) -> bool {
        if self.finished {
            return false;
        }
        self.exit_code = exit_code;
        self.finished = true;
        true
    }

    pub fn is_success(&self) -> bool {
        self.finished && self.exit_code == 0
    }
}
