use crate::error::{GatewayError, Result};
use skein_core::logging;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of one external invocation. `executed` is false when the call
/// itself could not be carried out (spawn failure or wall-clock timeout);
/// in that case `exit_code` is meaningless and `stderr` holds the reason.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub executed: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    fn not_executed(reason: impl Into<String>) -> Self {
        ProcessOutput {
            executed: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Runs `argv` synchronously on the calling thread. Stdout and stderr are
/// drained by two dedicated reader threads so a full pipe can never
/// deadlock the child. A timeout kills the child and reports the call as
/// not executed rather than synthesizing an exit code.
pub fn run(
    argv: &[String],
    envs: &[(String, String)],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    let (program, args) = argv.split_first().ok_or(GatewayError::EmptyCommand)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    logging::log_command(&cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Ok(ProcessOutput::not_executed(format!(
                "failed to spawn '{}': {}",
                program, e
            )))
        }
    };

    let stdout_thread = drain_pipe(child.stdout.take());
    let stderr_thread = drain_pipe(child.stderr.take());

    let status = match timeout {
        None => child.wait()?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                match child.try_wait()? {
                    Some(status) => break status,
                    None if Instant::now() >= deadline => {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = stdout_thread.join();
                        let _ = stderr_thread.join();
                        return Ok(ProcessOutput::not_executed(format!(
                            "'{}' timed out after {:?}",
                            program, limit
                        )));
                    }
                    None => thread::sleep(POLL_INTERVAL),
                }
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();

    Ok(ProcessOutput {
        executed: true,
        exit_code: exit_code(&status),
        stdout,
        stderr,
    })
}

/// Scheduler CLIs report a signal-terminated job as 128 + signal number.
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => status.signal().map_or(1, |sig| 128 + sig),
    }
}
