/*!
Process supervisor: owns every external `ping`/`traceroute` invocation.

Guarantees:

- every spawn carries a hard wall-clock timeout; on expiry the child is
  killed and reaped
- a registry tracks live pids so engine shutdown can sweep orphans
- spawns never create consoles on Windows
- a shutdown-signalled spawn returns `Cancelled`, never a fake result
*/

use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::scheduler::ShutdownSignal;
use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// How a spawn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnKind {
    Ok,
    Timeout,
    /// Killed by the shutdown sweep
    Killed,
    SpawnError,
}

#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub stdout: String,
    pub exit_code: Option<i32>,
    pub kind: SpawnKind,
    pub elapsed: Duration,
}

impl SpawnResult {
    pub fn succeeded(&self) -> bool {
        self.kind == SpawnKind::Ok && self.exit_code == Some(0)
    }
}

/// Runner abstraction so workers can be tested with canned output.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(
        &self,
        argv: &[String],
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> Result<SpawnResult, MonitorError>;
}

/// The production supervisor.
pub struct ProcessSupervisor {
    registry: Mutex<HashMap<u64, u32>>,
    next_id: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, pid: u32) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, pid);
        id
    }

    fn deregister(&self, id: u64) {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn tracked_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Kill everything still registered. Called by the engine after the
    /// orchestrator's grace period; normal spawns clean up inline.
    pub fn kill_orphans(&self) {
        let pids: Vec<u32> = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, pid)| pid)
            .collect();
        for pid in pids {
            get_debug_logger().warn("ProcessSupervisor", &format!("killing orphan pid {}", pid));
            terminate_pid(pid);
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeRunner for ProcessSupervisor {
    /// Spawn `argv` with a hard wall-clock timeout, collecting stdout.
    ///
    /// The child is killed when the timeout expires or when shutdown is
    /// signalled mid-flight; in the latter case the caller receives
    /// `MonitorError::Cancelled` so the result is never mistaken for a
    /// probe verdict.
    async fn run(
        &self,
        argv: &[String],
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> Result<SpawnResult, MonitorError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(MonitorError::SpawnError("empty argv".into()));
        };
        if shutdown.is_shutdown() {
            return Err(MonitorError::Cancelled);
        }

        let started = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW: no console flashes, no orphaned terminals
            cmd.creation_flags(0x0800_0000);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                get_debug_logger()
                    .debug("ProcessSupervisor", &format!("spawn {} failed: {}", program, e));
                return Ok(SpawnResult {
                    stdout: String::new(),
                    exit_code: None,
                    kind: SpawnKind::SpawnError,
                    elapsed: started.elapsed(),
                });
            }
        };

        let registry_id = child.id().map(|pid| self.register(pid));

        enum Waited {
            Done(Vec<u8>, std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Shutdown,
        }

        // The wait future borrows the child; keep it in an inner scope so
        // the borrow ends before the kill/reap paths below.
        let waited = {
            let wait_and_read = async {
                let mut buf = Vec::new();
                if let Some(mut out) = child.stdout.take() {
                    let _ = out.read_to_end(&mut buf).await;
                }
                let status = child.wait().await;
                (buf, status)
            };
            tokio::pin!(wait_and_read);
            tokio::select! {
                out = tokio::time::timeout(timeout, &mut wait_and_read) => match out {
                    Ok((buf, status)) => Waited::Done(buf, status),
                    Err(_) => Waited::TimedOut,
                },
                _ = shutdown.cancelled() => Waited::Shutdown,
            }
        };

        if let Some(id) = registry_id {
            self.deregister(id);
        }

        match waited {
            Waited::Done(buf, Ok(status)) => Ok(SpawnResult {
                stdout: String::from_utf8_lossy(&buf).into_owned(),
                exit_code: status.code(),
                kind: SpawnKind::Ok,
                elapsed: started.elapsed(),
            }),
            Waited::Done(_, Err(e)) => Err(MonitorError::SpawnError(format!(
                "wait failed for {}: {}",
                program, e
            ))),
            Waited::TimedOut => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_millis(200), child.wait()).await;
                Ok(SpawnResult {
                    stdout: String::new(),
                    exit_code: None,
                    kind: SpawnKind::Timeout,
                    elapsed: started.elapsed(),
                })
            }
            Waited::Shutdown => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_millis(200), child.wait()).await;
                Err(MonitorError::Cancelled)
            }
        }
    }
}

#[cfg(unix)]
fn terminate_pid(pid: u32) {
    // SIGKILL: the sweep runs after the cooperative grace period expired
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(windows)]
fn terminate_pid(pid: u32) {
    // taskkill /T also reaps any descendants of the probe
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
}

/// Locate the system ping binary for this platform, if present.
pub fn ping_binary_available() -> bool {
    which("ping")
}

pub fn traceroute_binary() -> Option<&'static str> {
    if cfg!(windows) {
        which("tracert").then_some("tracert")
    } else {
        which("traceroute").then_some("traceroute")
    }
}

fn which(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    let exts: &[&str] = if cfg!(windows) { &[".exe", ".com"] } else { &[""] };
    std::env::split_paths(&paths).any(|dir| {
        exts.iter().any(|ext| {
            let candidate = dir.join(format!("{}{}", name, ext));
            candidate.is_file()
        })
    })
}
