use skein_core::config::{ExecutionConfig, StepExecConfig};
use skein_core::constants::wait;
use skein_core::model::{
    InstanceKind, JobHandle, ScatterBundle, StepId, StepKind, StepState, WorkflowInstance,
};
use skein_engine::{
    Collaborators, CommandBuilder, EnginePools, InstanceStore, OutputCapture,
    WorkflowOrchestrator,
};
use skein_scheduler::{GatewayError, SchedulerGateway, SchedulerJobState, SubmitRequest};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct GatewayState {
    next_id: u64,
    /// Exit codes returned by successive waits per job id; the last entry
    /// is sticky.
    wait_codes: HashMap<u64, VecDeque<i32>>,
    /// The code most recently reported for a job by a wait.
    reported: HashMap<u64, i32>,
    /// Jobs that never resolve inside a multi-job wait.
    solo_ids: HashSet<u64>,
    submitted: Vec<(u64, String, Vec<String>, bool)>,
    killed: Vec<u64>,
    resumed: Vec<u64>,
    wait_calls: usize,
}

/// In-memory scheduler. Exit codes are scripted per job name; synthetic
/// `/bin/sh -c 'exit N'` submissions behave like an honest scheduler and
/// report N.
struct FakeGateway {
    state: Mutex<GatewayState>,
    scripted: HashMap<String, Vec<i32>>,
    fail_submit: HashSet<String>,
    slow: HashSet<String>,
}

impl FakeGateway {
    fn new() -> Self {
        FakeGateway {
            state: Mutex::new(GatewayState {
                next_id: 1000,
                ..GatewayState::default()
            }),
            scripted: HashMap::new(),
            fail_submit: HashSet::new(),
            slow: HashSet::new(),
        }
    }

    fn script(mut self, job_name: &str, codes: &[i32]) -> Self {
        self.scripted.insert(job_name.to_string(), codes.to_vec());
        self
    }

    fn failing_submit(mut self, job_name: &str) -> Self {
        self.fail_submit.insert(job_name.to_string());
        self
    }

    /// The named job outlives any wait that also covers other jobs; only
    /// a dedicated single-job wait sees it finish.
    fn slow(mut self, job_name: &str) -> Self {
        self.slow.insert(job_name.to_string());
        self
    }

    fn synthetic_code(argv: &[String]) -> Option<i32> {
        if argv.len() == 3 && argv[0] == "/bin/sh" && argv[1] == "-c" {
            return argv[2].strip_prefix("exit ").and_then(|s| s.parse().ok());
        }
        None
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }

    fn take_code(state: &mut GatewayState, job_id: u64) -> i32 {
        let queue = state
            .wait_codes
            .entry(job_id)
            .or_insert_with(|| VecDeque::from([0]));
        let code = if queue.len() > 1 {
            queue.pop_front().unwrap_or(0)
        } else {
            queue.front().copied().unwrap_or(0)
        };
        state.reported.insert(job_id, code);
        code
    }
}

impl SchedulerGateway for FakeGateway {
    fn submit(&self, request: &SubmitRequest) -> skein_scheduler::Result<u64> {
        if self.fail_submit.contains(&request.job_name) {
            return Err(GatewayError::SubmitFailed {
                exit_code: 3,
                stderr: "queue rejected the job".into(),
            });
        }
        let mut state = self.state();
        state.next_id += 1;
        let job_id = state.next_id;
        let codes = FakeGateway::synthetic_code(&request.argv)
            .map(|code| vec![code])
            .or_else(|| self.scripted.get(&request.job_name).cloned())
            .unwrap_or_else(|| vec![0]);
        state.wait_codes.insert(job_id, VecDeque::from(codes));
        if self.slow.contains(&request.job_name) {
            state.solo_ids.insert(job_id);
        }
        state.submitted.push((
            job_id,
            request.job_name.clone(),
            request.argv.clone(),
            request.hold,
        ));
        Ok(job_id)
    }

    fn wait(&self, job_ids: &[u64]) -> skein_scheduler::Result<()> {
        let mut state = self.state();
        state.wait_calls += 1;
        for page in job_ids.chunks(wait::PAGE_SIZE) {
            for &job_id in page {
                if job_ids.len() > 1 && state.solo_ids.contains(&job_id) {
                    continue;
                }
                let code = FakeGateway::take_code(&mut state, job_id);
                if code != 0 {
                    return Err(GatewayError::WaitFailed {
                        exit_code: code,
                        stderr: String::new(),
                    });
                }
            }
        }
        Ok(())
    }

    fn resume(&self, job_id: u64) -> skein_scheduler::Result<()> {
        self.state().resumed.push(job_id);
        Ok(())
    }

    fn kill(&self, job_ids: &[u64]) -> skein_scheduler::Result<()> {
        self.state().killed.extend_from_slice(job_ids);
        Ok(())
    }

    fn query_state(&self, job_id: u64) -> skein_scheduler::Result<SchedulerJobState> {
        let state = self.state();
        Ok(match state.reported.get(&job_id).copied() {
            Some(0) => SchedulerJobState::Done,
            Some(_) => SchedulerJobState::Exited,
            None => SchedulerJobState::Pending,
        })
    }

    fn query_exit_code(&self, job_id: u64) -> skein_scheduler::Result<i32> {
        let state = self.state();
        Ok(state
            .reported
            .get(&job_id)
            .copied()
            .or_else(|| {
                state
                    .wait_codes
                    .get(&job_id)
                    .and_then(|q| q.front().copied())
            })
            .unwrap_or(0))
    }
}

#[derive(Default)]
struct FakeBuilder {
    scatter_builds: Mutex<usize>,
}

impl CommandBuilder for FakeBuilder {
    fn build_final_command(&self, handle: &JobHandle) -> skein_engine::Result<Vec<String>> {
        Ok(vec!["run".to_string(), handle.name.clone()])
    }

    fn build_placeholder_command(&self, handle: &JobHandle) -> skein_engine::Result<Vec<String>> {
        Ok(vec![
            "placeholder".to_string(),
            handle.script_path.to_string_lossy().to_string(),
        ])
    }

    fn build_scatter_bundle(&self, handle: &JobHandle) -> skein_engine::Result<ScatterBundle> {
        *self.scatter_builds.lock().unwrap() += 1;
        Ok(handle.scatter.clone().unwrap_or_default())
    }

    fn bind_step_inputs(
        &self,
        handle: &mut JobHandle,
        _deps: &[JobHandle],
    ) -> skein_engine::Result<()> {
        handle.pending_inputs.clear();
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStore {
    steps: Mutex<Vec<JobHandle>>,
    instances: Mutex<Vec<WorkflowInstance>>,
}

impl InstanceStore for MemoryStore {
    fn save_step(&self, handle: &JobHandle) -> skein_engine::Result<()> {
        self.steps.lock().unwrap().push(handle.clone());
        Ok(())
    }

    fn save_instance(&self, instance: &WorkflowInstance) -> skein_engine::Result<()> {
        self.instances.lock().unwrap().push(instance.clone());
        Ok(())
    }
}

/// Writes the output marker the way a real capture layer would, which is
/// what makes repeated finalization of a shared dependency idempotent.
#[derive(Default)]
struct FakeOutputs {
    step_captures: Mutex<Vec<String>>,
    workflow_captures: Mutex<usize>,
}

impl OutputCapture for FakeOutputs {
    fn capture_step_outputs(&self, handle: &JobHandle) -> skein_engine::Result<()> {
        let marker_dir = handle.work_dir.join(".skein");
        std::fs::create_dir_all(&marker_dir)?;
        std::fs::write(marker_dir.join("outputs.json"), "{}")?;
        self.step_captures.lock().unwrap().push(handle.name.clone());
        Ok(())
    }

    fn capture_workflow_outputs(
        &self,
        _instance: &WorkflowInstance,
        _steps: &[JobHandle],
    ) -> skein_engine::Result<()> {
        *self.workflow_captures.lock().unwrap() += 1;
        Ok(())
    }
}

struct Harness {
    gateway: Arc<FakeGateway>,
    builder: Arc<FakeBuilder>,
    store: Arc<MemoryStore>,
    outputs: Arc<FakeOutputs>,
    pools: Arc<EnginePools>,
}

impl Harness {
    fn new(gateway: FakeGateway) -> Self {
        Harness {
            gateway: Arc::new(gateway),
            builder: Arc::new(FakeBuilder::default()),
            store: Arc::new(MemoryStore::default()),
            outputs: Arc::new(FakeOutputs::default()),
            pools: Arc::new(EnginePools::new()),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            gateway: Arc::clone(&self.gateway) as Arc<dyn SchedulerGateway>,
            builder: Arc::clone(&self.builder) as Arc<dyn CommandBuilder>,
            store: Arc::clone(&self.store) as Arc<dyn InstanceStore>,
            outputs: Arc::clone(&self.outputs) as Arc<dyn OutputCapture>,
        }
    }

    fn orchestrate(&self, handles: Vec<JobHandle>) -> WorkflowOrchestrator {
        self.orchestrate_with_config(handles, ExecutionConfig::default())
    }

    fn orchestrate_with_config(
        &self,
        handles: Vec<JobHandle>,
        config: ExecutionConfig,
    ) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            WorkflowInstance::new("wf", InstanceKind::Workflow),
            handles,
            self.collaborators(),
            config,
            Arc::clone(&self.pools),
        )
        .unwrap()
    }
}

fn make_handle(root: &Path, name: &str) -> JobHandle {
    let mut handle = JobHandle::new(StepId(name.to_string()), name, StepKind::CommandLineTool);
    handle.work_dir = root.join(name);
    handle.output_dir = handle.work_dir.join("out");
    handle.script_path = handle.work_dir.join(".skein").join("wrapper.sh");
    std::fs::create_dir_all(&handle.work_dir).unwrap();
    handle
}

fn ready(mut handle: JobHandle) -> JobHandle {
    handle.built_command = vec!["run".to_string(), handle.name.clone()];
    handle.ready_to_run = true;
    handle
}

fn pending(mut handle: JobHandle, inputs: &[&str]) -> JobHandle {
    handle.pending_inputs = inputs.iter().map(|s| s.to_string()).collect();
    handle
}

fn state_of(steps: &[JobHandle], name: &str) -> StepState {
    steps.iter().find(|h| h.name == name).unwrap().state
}

fn step<'a>(steps: &'a [JobHandle], name: &str) -> &'a JobHandle {
    steps.iter().find(|h| h.name == name).unwrap()
}

#[test]
fn test_linear_chain_runs_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);
    let c = pending(make_handle(dir.path(), "c"), &["b"]);

    let orchestrator = harness.orchestrate(vec![a, b, c]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    for name in ["a", "b", "c"] {
        assert_eq!(state_of(&steps, name), StepState::Done);
    }
    let instance = orchestrator.instance_snapshot();
    assert!(instance.is_success());

    // Each step's wait was scheduled exactly once.
    let state = harness.gateway.state();
    assert_eq!(state.wait_calls, 3);
    // Both placeholders were resumed after binding.
    assert_eq!(state.resumed.len(), 2);
    assert_eq!(*harness.outputs.workflow_captures.lock().unwrap(), 1);
}

#[test]
fn test_placeholders_are_submitted_held() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);

    let orchestrator = harness.orchestrate(vec![a, b]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let state = harness.gateway.state();
    let held: Vec<&String> = state
        .submitted
        .iter()
        .filter(|(_, _, _, hold)| *hold)
        .map(|(_, name, _, _)| name)
        .collect();
    assert_eq!(held, vec!["b"]);

    // The wrapper script was rewritten with the real command before resume.
    let steps = orchestrator.step_snapshots();
    let script = std::fs::read_to_string(&step(&steps, "b").script_path).unwrap();
    assert!(script.contains("run b"));
}

#[test]
fn test_dependency_failure_stops_instance_and_kills_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new().script("b", &[137]));
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);
    let c = pending(make_handle(dir.path(), "c"), &["b"]);

    let orchestrator = harness.orchestrate(vec![a, b, c]);
    assert_eq!(orchestrator.run().unwrap(), 137);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "a"), StepState::Done);
    assert_eq!(state_of(&steps, "b"), StepState::Exited);
    assert_eq!(step(&steps, "b").exit_code, 137);
    assert_eq!(state_of(&steps, "c"), StepState::Killed);

    let instance = orchestrator.instance_snapshot();
    assert!(instance.finished);
    assert_eq!(instance.exit_code, 137);

    // Exactly one kill, for c's still-held placeholder.
    let state = harness.gateway.state();
    assert_eq!(state.killed.len(), 1);
    assert_eq!(state.killed[0], step(&steps, "c").scheduler_id.unwrap());
}

#[test]
fn test_declared_success_code_is_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new().script("b", &[3]));
    let a = ready(make_handle(dir.path(), "a"));
    let mut b = pending(make_handle(dir.path(), "b"), &["a"]);
    b.success_codes.insert(3);
    let c = pending(make_handle(dir.path(), "c"), &["b"]);

    let orchestrator = harness.orchestrate(vec![a, b, c]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "b"), StepState::Done);
    assert_eq!(state_of(&steps, "c"), StepState::Done);
}

#[test]
fn test_failed_wait_waits_out_still_running_sibling() {
    let dir = tempfile::tempdir().unwrap();
    // a exits with its declared success code 3, which fails the combined
    // wait while b is still running; b must not be finalized until a wait
    // actually covering it succeeds.
    let harness = Harness::new(FakeGateway::new().script("a", &[3]).slow("b"));
    let mut a = ready(make_handle(dir.path(), "a"));
    a.success_codes.insert(3);
    let b = ready(make_handle(dir.path(), "b"));
    let c = pending(make_handle(dir.path(), "c"), &["a", "b"]);

    let orchestrator = harness.orchestrate(vec![a, b, c]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    for name in ["a", "b", "c"] {
        assert_eq!(state_of(&steps, name), StepState::Done);
    }
    // b's DONE was backed by a successful wait on its own job, not by an
    // exit-code query against a job the failed page never resolved.
    let b_id = step(&steps, "b").scheduler_id.unwrap();
    let state = harness.gateway.state();
    assert_eq!(state.reported.get(&b_id).copied(), Some(0));
}

#[test]
fn test_post_failure_recovery_rescues_the_step() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("recover.sh");
    std::fs::write(
        &script_path,
        "#!/bin/sh\necho \"$SKEIN_JOB_ID\" > \"$SKEIN_JOB_CWD/recovered\"\nexit 0\n",
    )
    .unwrap();
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // First wait on b fails with 137; the re-wait after recovery succeeds.
    let harness = Harness::new(FakeGateway::new().script("b", &[137, 0]));
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);
    let c = pending(make_handle(dir.path(), "c"), &["b"]);
    let b_work_dir = b.work_dir.clone();

    let mut config = ExecutionConfig::default();
    config.step.insert(
        "b".to_string(),
        StepExecConfig {
            post_failure_script: Some(script_path),
            retry: Some(2),
            timeout_secs: None,
            container: None,
        },
    );

    let orchestrator = harness.orchestrate_with_config(vec![a, b, c], config);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "b"), StepState::Done);
    assert_eq!(state_of(&steps, "c"), StepState::Done);

    // The script ran with the failed job's id in its environment.
    let recorded = std::fs::read_to_string(b_work_dir.join("recovered")).unwrap();
    assert_eq!(
        recorded.trim(),
        step(&steps, "b").scheduler_id.unwrap().to_string()
    );
}

#[test]
fn test_recovery_exhaustion_fails_the_step() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("recover.sh");
    std::fs::write(&script_path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // Every wait on b fails, so both retries are burned.
    let harness = Harness::new(FakeGateway::new().script("b", &[137]));
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);

    let mut config = ExecutionConfig::default();
    config.step.insert(
        "b".to_string(),
        StepExecConfig {
            post_failure_script: Some(script_path),
            retry: Some(2),
            timeout_secs: None,
            container: None,
        },
    );

    let orchestrator = harness.orchestrate_with_config(vec![a, b], config);
    assert_eq!(orchestrator.run().unwrap(), 137);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "b"), StepState::Exited);
    // Initial wait for a, failed wait on b, and two recovery re-waits.
    assert_eq!(harness.gateway.state().wait_calls, 4);
}

#[test]
fn test_scatter_fans_out_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let mut s = ready(make_handle(dir.path(), "s"));
    s.scatter = Some(ScatterBundle {
        commands: vec![
            vec!["work".into(), "0".into()],
            vec!["work".into(), "1".into()],
            vec!["work".into(), "2".into()],
        ],
        empty_scatter: false,
    });

    let orchestrator = harness.orchestrate(vec![s]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "s"), StepState::Done);
    assert_eq!(step(&steps, "s").scatter_job_ids.len(), 3);

    let state = harness.gateway.state();
    let names: Vec<&str> = state
        .submitted
        .iter()
        .map(|(_, name, _, _)| name.as_str())
        .collect();
    assert!(names.contains(&"s-scatter-0"));
    assert!(names.contains(&"s-scatter-2"));
    // The synthetic result job folds the fan-in back to one success.
    let gather = state
        .submitted
        .iter()
        .find(|(_, name, _, _)| name == "s-gather")
        .unwrap();
    assert_eq!(gather.2, vec!["/bin/sh", "-c", "exit 0"]);
    // The bundle came through the command-building collaborator.
    assert_eq!(*harness.builder.scatter_builds.lock().unwrap(), 1);
}

#[test]
fn test_scatter_submit_failure_kills_submitted_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new().failing_submit("s-scatter-1"));
    let mut s = ready(make_handle(dir.path(), "s"));
    s.scatter = Some(ScatterBundle {
        commands: vec![
            vec!["work".into(), "0".into()],
            vec!["work".into(), "1".into()],
            vec!["work".into(), "2".into()],
        ],
        empty_scatter: false,
    });

    let orchestrator = harness.orchestrate(vec![s]);
    assert_eq!(orchestrator.run().unwrap(), 255);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    let s_handle = step(&steps, "s");
    assert_eq!(s_handle.state, StepState::Exited);
    assert_eq!(s_handle.exit_code, 255);

    // The two siblings that did submit were recorded and killed.
    assert_eq!(s_handle.scatter_job_ids.len(), 2);
    let state = harness.gateway.state();
    for job_id in &s_handle.scatter_job_ids {
        assert!(state.killed.contains(job_id));
    }
    assert_eq!(state.killed.len(), 2);
}

#[test]
fn test_scatter_subset_failure_propagates_first_code() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new().script("s-scatter-1", &[9]));
    let mut s = ready(make_handle(dir.path(), "s"));
    s.scatter = Some(ScatterBundle {
        commands: vec![
            vec!["work".into(), "0".into()],
            vec!["work".into(), "1".into()],
        ],
        empty_scatter: false,
    });

    let orchestrator = harness.orchestrate(vec![s]);
    assert_eq!(orchestrator.run().unwrap(), 9);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "s"), StepState::Exited);
    assert_eq!(step(&steps, "s").exit_code, 9);
}

#[test]
fn test_empty_scatter_substitutes_noop_success() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let mut s = ready(make_handle(dir.path(), "s"));
    s.scatter = Some(ScatterBundle::empty());

    let orchestrator = harness.orchestrate(vec![s]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    assert_eq!(
        state_of(&orchestrator.step_snapshots(), "s"),
        StepState::Done
    );
    // Exactly one submission: the synthetic success job.
    assert_eq!(harness.gateway.state().submitted.len(), 1);
}

#[test]
fn test_container_step_replaces_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let a = ready(make_handle(dir.path(), "a"));
    let mut d = pending(make_handle(dir.path(), "d"), &["a"]);
    d.container_image = Some("quay.io/skein/tool:1".to_string());

    let mut config = ExecutionConfig::default();
    config.step.insert(
        "d".to_string(),
        StepExecConfig {
            post_failure_script: None,
            retry: None,
            timeout_secs: None,
            container: Some(true),
        },
    );

    let orchestrator = harness.orchestrate_with_config(vec![a, d], config);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    let d_handle = step(&steps, "d");
    assert_eq!(d_handle.state, StepState::Done);
    // The held placeholder was superseded by the fresh submission.
    assert_eq!(d_handle.superseded_ids.len(), 1);
    let old_id = d_handle.superseded_ids[0];
    let state = harness.gateway.state();
    assert!(state.killed.contains(&old_id));
    assert!(!state.resumed.contains(&old_id));
}

#[test]
fn test_submit_failure_carries_gateway_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new().failing_submit("a"));
    let a = ready(make_handle(dir.path(), "a"));

    let orchestrator = harness.orchestrate(vec![a]);
    assert_eq!(orchestrator.run().unwrap(), 3);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "a"), StepState::Exited);
    assert_eq!(step(&steps, "a").exit_code, 3);
}

#[test]
fn test_rerun_of_finished_steps_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let mut a = ready(make_handle(dir.path(), "a"));
    a.state = StepState::Done;
    let mut b = pending(make_handle(dir.path(), "b"), &["a"]);
    b.state = StepState::Done;

    let orchestrator = harness.orchestrate(vec![a, b]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    assert!(orchestrator.instance_snapshot().is_success());
    assert!(harness.gateway.state().submitted.is_empty());
    assert_eq!(*harness.outputs.workflow_captures.lock().unwrap(), 1);
}

#[test]
fn test_shutdown_kills_waiting_steps_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);

    let orchestrator = harness.orchestrate(vec![a, b]);
    orchestrator.submit_all();
    // Let both initial submissions land before pulling the plug.
    while harness.pools.submission.join() > 0 {}
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    assert_eq!(state_of(&steps, "b"), StepState::Killed);
    let instance = orchestrator.instance_snapshot();
    assert!(instance.finished);
    assert_eq!(instance.exit_code, 255);

    let state = harness.gateway.state();
    assert_eq!(state.killed.len(), 1);
    assert_eq!(state.killed[0], step(&steps, "b").scheduler_id.unwrap());
}

#[test]
fn test_rejects_duplicate_step_ids() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let a1 = ready(make_handle(dir.path(), "a"));
    let a2 = ready(make_handle(dir.path(), "a"));

    let result = WorkflowOrchestrator::new(
        WorkflowInstance::new("wf", InstanceKind::Workflow),
        vec![a1, a2],
        harness.collaborators(),
        ExecutionConfig::default(),
        Arc::clone(&harness.pools),
    );
    assert!(result.is_err());
}

#[test]
fn test_rejects_empty_and_finished_instances() {
    let harness = Harness::new(FakeGateway::new());

    let empty = WorkflowOrchestrator::new(
        WorkflowInstance::new("wf", InstanceKind::Workflow),
        vec![],
        harness.collaborators(),
        ExecutionConfig::default(),
        Arc::clone(&harness.pools),
    );
    assert!(empty.is_err());

    let dir = tempfile::tempdir().unwrap();
    let mut finished = WorkflowInstance::new("wf", InstanceKind::Workflow);
    finished.mark_finished(0);
    let result = WorkflowOrchestrator::new(
        finished,
        vec![ready(make_handle(dir.path(), "a"))],
        harness.collaborators(),
        ExecutionConfig::default(),
        Arc::clone(&harness.pools),
    );
    assert!(result.is_err());
}

#[test]
fn test_shared_dependency_is_finalized_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeGateway::new());
    let a = ready(make_handle(dir.path(), "a"));
    let b = pending(make_handle(dir.path(), "b"), &["a"]);
    let c = pending(make_handle(dir.path(), "c"), &["a"]);

    let orchestrator = harness.orchestrate(vec![a, b, c]);
    assert_eq!(orchestrator.run().unwrap(), 0);
    orchestrator.shutdown();

    let steps = orchestrator.step_snapshots();
    for name in ["a", "b", "c"] {
        assert_eq!(state_of(&steps, name), StepState::Done);
    }
    // Two waiters raced to finalize a; output capture must have run once.
    let captures = harness.outputs.step_captures.lock().unwrap();
    assert_eq!(captures.iter().filter(|n| *n == "a").count(), 1);
}
