//! Helpers for driving external camera tools.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Return the first candidate found as an executable on `PATH`.
pub fn find_tool(candidates: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    candidates.iter().find_map(|name| {
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Escalation windows for [`stop_gracefully`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimeouts {
    /// Wait after the interrupt signal.
    pub graceful: Duration,
    /// Wait after the terminate signal.
    pub terminate: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            graceful: Duration::from_secs(10),
            terminate: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Exited(ExitStatus),
    ForceKilled,
}

/// Stop a child with SIGINT, then SIGTERM, then SIGKILL, waiting a bounded
/// time after each of the first two. Always reaps the child.
pub fn stop_gracefully(child: &mut Child, timeouts: StopTimeouts) -> StopOutcome {
    if let Ok(Some(status)) = child.try_wait() {
        return StopOutcome::Exited(status);
    }

    #[cfg(unix)]
    {
        for (signal, window) in [
            (libc::SIGINT, timeouts.graceful),
            (libc::SIGTERM, timeouts.terminate),
        ] {
            send_signal(child, signal);
            if let Some(status) = wait_with_deadline(child, window) {
                return StopOutcome::Exited(status);
            }
            tracing::warn!(target: "camera", "[PROCESS] pid {} ignored signal {} for {:?}", child.id(), signal, window);
        }
    }
    #[cfg(not(unix))]
    let _ = timeouts;

    let _ = child.kill();
    let _ = child.wait();
    StopOutcome::ForceKilled
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: `pid` belongs to a child we have not reaped yet, so it cannot
    // have been recycled for an unrelated process.
    unsafe {
        libc::kill(pid, signal);
    }
}

/// Poll `try_wait` until the child exits or `timeout` elapses.
pub(crate) fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Owns a running tool process. Kills and reaps it on drop unless taken.
pub struct ProcessGuard {
    child: Option<Child>,
    label: String,
}

impl ProcessGuard {
    pub fn new(child: Child, label: impl Into<String>) -> Self {
        Self {
            child: Some(child),
            label: label.into(),
        }
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Releases the child. Drop will not kill after this.
    pub fn take(&mut self) -> Option<Child> {
        self.child.take()
    }

    /// Stop the child with the signal escalation and release it.
    pub fn stop(&mut self, timeouts: StopTimeouts) -> Option<StopOutcome> {
        let mut child = self.child.take()?;
        let outcome = stop_gracefully(&mut child, timeouts);
        tracing::debug!(target: "camera", "[PROCESS {}] Stopped: {:?}", self.label, outcome);
        Some(outcome)
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!(target: "camera", "[PROCESS {}] Guard dropped with live process, killing", self.label);
            if let Err(e) = child.kill() {
                tracing::warn!(target: "camera", "[PROCESS {}] Failed to kill: {}", self.label, e);
            }
            let _ = child.wait();
        }
    }
}

/// Keeps the last few lines a child wrote to a pipe.
#[derive(Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    pub fn spawn<R: Read + Send + 'static>(
        stream: R,
        max_lines: usize,
    ) -> (Self, Option<JoinHandle<()>>) {
        let tail = Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines))),
        };
        let lines = Arc::clone(&tail.lines);
        let handle = std::thread::Builder::new()
            .name("stderr-tail".into())
            .spawn(move || {
                for line in BufReader::new(stream).lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let mut lines = lines.lock().unwrap_or_else(PoisonError::into_inner);
                    if lines.len() == max_lines {
                        lines.pop_front();
                    }
                    lines.push_back(line);
                }
            })
            .ok();
        (tail, handle)
    }

    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}
