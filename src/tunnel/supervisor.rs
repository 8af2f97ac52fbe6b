//! Background process supervision
//!
//! The tunnel manager only needs four things from an OS process: start it,
//! ask whether it is still running, read what it wrote to stderr, and stop
//! it. `ProcessSupervisor` captures exactly that so tunnels can be tested
//! without spawning anything.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use super::TunnelError;

/// How long `capture_stderr` waits for a pipe that is still open
const STDERR_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to launch a background process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment for the child; nothing is inherited implicitly
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows fakes in tests)
// ============================================================================

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn start(&self, spec: &ProcessSpec) -> Result<ProcessId, TunnelError>;

    async fn is_alive(&self, id: ProcessId) -> bool;

    /// Whatever the process has written to stderr; empty if unavailable
    async fn capture_stderr(&self, id: ProcessId) -> String;

    /// Stop the process. Unknown or already-exited processes are not an error.
    async fn terminate(&self, id: ProcessId) -> Result<(), TunnelError>;
}

// ============================================================================
// SBIO: I/O implementation (tokio child processes)
// ============================================================================

/// Supervises real child processes spawned with `tokio::process`
#[derive(Default)]
pub struct ChildSupervisor {
    children: DashMap<ProcessId, Child>,
}

impl ChildSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> usize {
        self.children.len()
    }
}

#[async_trait]
impl ProcessSupervisor for ChildSupervisor {
    async fn start(&self, spec: &ProcessSpec) -> Result<ProcessId, TunnelError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Own process group so a Ctrl-C aimed at us doesn't take the tunnel down first
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TunnelError::SpawnFailed(format!(
                    "{} not found. Please ensure it is installed and in your PATH.",
                    spec.program
                ))
            } else {
                TunnelError::SpawnFailed(format!("Failed to start {}: {}", spec.program, e))
            }
        })?;

        let id = ProcessId::new();
        debug!(
            "Started background process {} (pid {:?}): {}",
            id,
            child.id(),
            spec.command_line()
        );
        self.children.insert(id, child);
        Ok(id)
    }

    async fn is_alive(&self, id: ProcessId) -> bool {
        self.children
            .get_mut(&id)
            .map(|mut child| matches!(child.try_wait(), Ok(None)))
            .unwrap_or(false)
    }

    async fn capture_stderr(&self, id: ProcessId) -> String {
        let pipe = self
            .children
            .get_mut(&id)
            .and_then(|mut child| child.stderr.take());

        let Some(mut pipe) = pipe else {
            return String::new();
        };

        let mut buf = Vec::new();
        match tokio::time::timeout(STDERR_READ_TIMEOUT, pipe.read_to_end(&mut buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to read stderr of {}: {}", id, e),
            // Partial output is still useful
            Err(_) => debug!("Stderr of {} still open, using partial output", id),
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    }

    async fn terminate(&self, id: ProcessId) -> Result<(), TunnelError> {
        let Some((_, mut child)) = self.children.remove(&id) else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("Process {} already exited with {}", id, status);
            return Ok(());
        }

        child.kill().await?;
        debug!("Terminated background process {}", id);
        Ok(())
    }
}

// ============================================================================
// SBIO: Fake implementation for testing (no processes)
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Pretends to run processes. The first `fail_first` processes are
    /// reported dead as soon as they are checked.
    pub struct FakeSupervisor {
        fail_first: usize,
        stderr: String,
        alive: DashMap<ProcessId, bool>,
        pub started: Mutex<Vec<ProcessSpec>>,
        terminated: AtomicUsize,
    }

    impl FakeSupervisor {
        pub fn healthy() -> Self {
            Self::failing_first(0, "")
        }

        pub fn failing_first(count: usize, stderr: &str) -> Self {
            Self {
                fail_first: count,
                stderr: stderr.to_string(),
                alive: DashMap::new(),
                started: Mutex::new(Vec::new()),
                terminated: AtomicUsize::new(0),
            }
        }

        pub fn start_count(&self) -> usize {
            self.started.lock().unwrap().len()
        }

        pub fn terminate_count(&self) -> usize {
            self.terminated.load(Ordering::SeqCst)
        }

        /// Simulate the process dying on its own
        pub fn kill_all(&self) {
            for mut entry in self.alive.iter_mut() {
                *entry.value_mut() = false;
            }
        }
    }

    #[async_trait]
    impl ProcessSupervisor for FakeSupervisor {
        async fn start(&self, spec: &ProcessSpec) -> Result<ProcessId, TunnelError> {
            let mut started = self.started.lock().unwrap();
            let alive = started.len() >= self.fail_first;
            started.push(spec.clone());

            let id = ProcessId::new();
            self.alive.insert(id, alive);
            Ok(id)
        }

        async fn is_alive(&self, id: ProcessId) -> bool {
            self.alive.get(&id).map(|a| *a).unwrap_or(false)
        }

        async fn capture_stderr(&self, _id: ProcessId) -> String {
            self.stderr.clone()
        }

        async fn terminate(&self, id: ProcessId) -> Result<(), TunnelError> {
            if self.alive.remove(&id).is_some() {
                self.terminated.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}
