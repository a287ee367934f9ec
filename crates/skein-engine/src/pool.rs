use crate::context::lock;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

/// Named collection of worker threads. Threads are detached from the
/// spawner's control flow but joined explicitly at shutdown; nothing here
/// is process-global, so two engine runs in one process never share state.
pub struct WorkerPool {
    name: &'static str,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &'static str) -> Self {
        WorkerPool {
            name,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned = thread::Builder::new()
            .name(format!("skein-{}", self.name))
            .spawn(task);
        match spawned {
            Ok(handle) => lock(&self.handles).push(handle),
            Err(e) => tracing::error!("Failed to spawn {} worker: {}", self.name, e),
        }
    }

    /// Joins every thread spawned so far and returns how many were joined.
    pub fn join(&self) -> usize {
        let drained: Vec<_> = lock(&self.handles).drain(..).collect();
        let count = drained.len();
        for handle in drained {
            if handle.join().is_err() {
                tracing::error!("A {} worker panicked", self.name);
            }
        }
        count
    }
}

/// The three worker pools one orchestrator run owns: initial submissions,
/// dependency waits, and scatter coordination.
pub struct EnginePools {
    pub submission: WorkerPool,
    pub wait: WorkerPool,
    pub scatter: WorkerPool,
}

impl EnginePools {
    pub fn new() -> Self {
        EnginePools {
            submission: WorkerPool::new("submit"),
            wait: WorkerPool::new("wait"),
            scatter: WorkerPool::new("scatter"),
        }
    }

    /// Joins until quiescent. A wait worker can spawn further submissions,
    /// so keep sweeping until a full pass joins nothing.
    pub fn join_all(&self) {
        loop {
            let joined = self.submission.join() + self.wait.join() + self.scatter.join();
            if joined == 0 {
                break;
            }
        }
    }
}

impl Default for EnginePools {
    fn default() -> Self {
        EnginePools::new()
    }
}
