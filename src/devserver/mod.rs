//! Long-running dev server processes, one per repository root.
//!
//! A [`DevServer`] is an explicit handle whose lifecycle is
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. The state lives
//! in a `watch` channel so [`DevServer::state`] answers while a start or
//! stop is in flight. The dev command runs as the leader of its own process
//! group, and stopping signals the whole group.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DevServerSettings;
use crate::errors::DevServerError;

/// How long `stop` waits after SIGTERM before killing the process group.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DevServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for DevServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DevServerState::Stopped => "stopped",
            DevServerState::Starting => "starting",
            DevServerState::Running => "running",
            DevServerState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// The spawned shell and the process group it leads.
struct ServerProcess {
    child: Child,
    pgid: libc::pid_t,
}

pub struct DevServer {
    command: String,
    stop_timeout: Duration,
    state: watch::Sender<DevServerState>,
    process: Mutex<Option<ServerProcess>>,
}

impl DevServer {
    pub fn new(command: impl Into<String>) -> Self {
        let (state, _) = watch::channel(DevServerState::Stopped);
        Self {
            command: command.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            state,
            process: Mutex::new(None),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Current state. A shell that has exited on its own is reaped here and
    /// reported as `Stopped`.
    pub fn state(&self) -> DevServerState {
        if let Ok(mut process) = self.process.try_lock() {
            self.reap(&mut process);
        }
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DevServerState::Running
    }

    /// Spawn the dev command in `dir` as the leader of a new process group.
    /// Does nothing if a server is already starting or running.
    pub async fn start(&self, dir: &Path) -> Result<(), DevServerError> {
        let mut process = self.process.lock().await;
        self.reap(&mut process);
        if *self.state.borrow() != DevServerState::Stopped {
            warn!(dir = %dir.display(), "Dev server is already running");
            return Ok(());
        }

        self.state.send_replace(DevServerState::Starting);
        info!(dir = %dir.display(), command = %self.command, "Starting dev server");
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(dir)
            .stdin(std::process::Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.state.send_replace(DevServerState::Stopped);
                return Err(DevServerError::Spawn {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        };
        let Some(pid) = child.id() else {
            self.state.send_replace(DevServerState::Stopped);
            return Err(DevServerError::Spawn {
                dir: dir.to_path_buf(),
                source: io::Error::other("dev server exited before it could be tracked"),
            });
        };

        info!(pid, "Dev server started");
        *process = Some(ServerProcess {
            child,
            pgid: pid as libc::pid_t,
        });
        self.state.send_replace(DevServerState::Running);
        Ok(())
    }

    /// Terminate the server's whole process group and wait for it to exit.
    /// Processes still alive after the stop timeout are killed.
    pub async fn stop(&self) -> Result<(), DevServerError> {
        let mut guard = self.process.lock().await;
        self.reap(&mut guard);
        let Some(mut process) = guard.take() else {
            warn!("No dev server is currently running");
            return Err(DevServerError::NotRunning);
        };

        self.state.send_replace(DevServerState::Stopping);
        info!(pgid = process.pgid, "Stopping dev server");
        let result = self.terminate(&mut process).await;
        self.state.send_replace(DevServerState::Stopped);
        if result.is_ok() {
            info!("Dev server stopped");
        }
        result
    }

    async fn terminate(&self, process: &mut ServerProcess) -> Result<(), DevServerError> {
        let deadline = Instant::now() + self.stop_timeout;
        ignore_missing(signal_group(process.pgid, libc::SIGTERM)).map_err(DevServerError::Stop)?;

        match tokio::time::timeout_at(deadline, process.child.wait()).await {
            Ok(Ok(status)) => debug!(exit_code = ?status.code(), "Dev server shell exited"),
            Ok(Err(e)) => return Err(DevServerError::Stop(e)),
            Err(_) => {}
        }
        while group_alive(process.pgid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        if group_alive(process.pgid) {
            warn!(pgid = process.pgid, "Dev server ignored SIGTERM, killing process group");
            ignore_missing(signal_group(process.pgid, libc::SIGKILL)).map_err(DevServerError::Stop)?;
        }
        process.child.wait().await.map_err(DevServerError::Stop)?;
        Ok(())
    }

    fn reap(&self, process: &mut Option<ServerProcess>) {
        let Some(running) = process.as_mut() else {
            return;
        };
        match running.child.try_wait() {
            Ok(Some(status)) => {
                info!(exit_code = ?status.code(), "Dev server exited");
                // Anything the shell left behind in its group goes with it.
                let _ = signal_group(running.pgid, libc::SIGKILL);
                *process = None;
                self.state.send_replace(DevServerState::Stopped);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to poll dev server status"),
        }
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        if let Some(process) = self.process.get_mut() {
            let _ = signal_group(process.pgid, libc::SIGKILL);
        }
    }
}

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions.
    if unsafe { libc::killpg(pgid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn group_alive(pgid: libc::pid_t) -> bool {
    signal_group(pgid, 0).is_ok()
}

/// A group that is already gone counts as signalled.
fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
        other => other,
    }
}

/// One [`DevServer`] per repository root, created on first use. Handles for
/// stopped servers that nobody else references are dropped on the next
/// lookup.
pub struct DevServers {
    command: String,
    stop_timeout: Duration,
    servers: Mutex<HashMap<PathBuf, Arc<DevServer>>>,
}

impl DevServers {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            servers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &DevServerSettings) -> Self {
        let mut servers = Self::new(settings.command.clone());
        servers.stop_timeout = Duration::from_secs(settings.stop_timeout_secs);
        servers
    }

    pub async fn get(&self, root: &Path) -> Arc<DevServer> {
        let mut servers = self.servers.lock().await;
        servers.retain(|key, server| {
            key == root || Arc::strong_count(server) > 1 || server.state() != DevServerState::Stopped
        });
        servers
            .entry(root.to_path_buf())
            .or_insert_with(|| {
                Arc::new(DevServer::new(self.command.clone()).with_stop_timeout(self.stop_timeout))
            })
            .clone()
    }

    /// The handle for `root` if one has been created.
    pub async fn existing(&self, root: &Path) -> Option<Arc<DevServer>> {
        self.servers.lock().await.get(root).cloned()
    }

    pub async fn stop_all(&self) {
        let servers: Vec<(PathBuf, Arc<DevServer>)> = self
            .servers
            .lock()
            .await
            .iter()
            .map(|(root, server)| (root.clone(), server.clone()))
            .collect();
        for (root, server) in servers {
            if server.is_running() {
                if let Err(e) = server.stop().await {
                    warn!(root = %root.display(), error = %e, "Failed to stop dev server");
                }
            }
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.servers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let dir = tempdir().unwrap();
        let server = DevServer::new("sleep 30");
        assert_eq!(server.state(), DevServerState::Stopped);

        server.start(dir.path()).await.unwrap();
        assert_eq!(server.state(), DevServerState::Running);

        // Second start is a no-op.
        server.start(dir.path()).await.unwrap();
        assert!(server.is_running());

        server.stop().await.unwrap();
        assert_eq!(server.state(), DevServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_fails() {
        let server = DevServer::new("sleep 30");
        assert!(matches!(server.stop().await, Err(DevServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_exited_process_is_reported_stopped() {
        let dir = tempdir().unwrap();
        let server = DevServer::new("true");
        server.start(dir.path()).await.unwrap();

        let mut stopped = false;
        for _ in 0..50 {
            if server.state() == DevServerState::Stopped {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped);
        assert!(matches!(server.stop().await, Err(DevServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_spawn_in_missing_dir_fails() {
        let server = DevServer::new("sleep 30");
        let err = server
            .start(Path::new("/nonexistent/promptsmith/app"))
            .await
            .unwrap_err();
        assert!(matches!(err, DevServerError::Spawn { .. }));
        assert_eq!(server.state(), DevServerState::Stopped);
    }

    /// Wait for the shell to record the pid of the process it forked.
    #[cfg(target_os = "linux")]
    async fn forked_pid(dir: &Path) -> i32 {
        for _ in 0..100 {
            if let Ok(raw) = std::fs::read_to_string(dir.join("child.pid")) {
                if let Ok(pid) = raw.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("dev command never wrote child.pid");
    }

    /// Alive and not a zombie waiting for its new parent to reap it.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_stop_terminates_processes_forked_by_the_shell() {
        let dir = tempdir().unwrap();
        let server = DevServer::new("sleep 300 & echo $! > child.pid; wait")
            .with_stop_timeout(Duration::from_secs(2));
        server.start(dir.path()).await.unwrap();
        let pid = forked_pid(dir.path()).await;
        assert!(process_alive(pid));

        server.stop().await.unwrap();
        assert_eq!(server.state(), DevServerState::Stopped);
        assert!(!process_alive(pid), "forked process {} survived stop", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_stop_kills_group_that_ignores_sigterm() {
        let dir = tempdir().unwrap();
        let server = DevServer::new("trap '' TERM; sleep 300 & echo $! > child.pid; wait")
            .with_stop_timeout(Duration::from_millis(300));
        server.start(dir.path()).await.unwrap();
        let pid = forked_pid(dir.path()).await;

        server.stop().await.unwrap();
        assert_eq!(server.state(), DevServerState::Stopped);
        assert!(!process_alive(pid), "forked process {} survived stop", pid);
    }

    #[tokio::test]
    async fn test_registry_forgets_unreferenced_stopped_servers() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let c = tempdir().unwrap();
        let servers = DevServers::new("sleep 30");

        drop(servers.get(a.path()).await);
        let running = servers.get(b.path()).await;
        running.start(b.path()).await.unwrap();
        drop(running);
        assert_eq!(servers.tracked().await, 2);

        let _c = servers.get(c.path()).await;
        assert!(servers.existing(a.path()).await.is_none());
        assert!(servers.existing(b.path()).await.is_some());
        assert_eq!(servers.tracked().await, 2);

        servers.stop_all().await;
    }

    #[test]
    fn test_from_settings_uses_configured_command() {
        let settings = DevServerSettings {
            command: "npm run dev".into(),
            stop_timeout_secs: 1,
        };
        let servers = DevServers::from_settings(&settings);
        assert_eq!(servers.command, "npm run dev");
        assert_eq!(servers.stop_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_registry_returns_same_handle_per_root() {
        let dir = tempdir().unwrap();
        let servers = DevServers::new("sleep 30");
        assert!(servers.existing(dir.path()).await.is_none());

        let a = servers.get(dir.path()).await;
        let b = servers.get(dir.path()).await;
        assert!(Arc::ptr_eq(&a, &b));

        a.start(dir.path()).await.unwrap();
        servers.stop_all().await;
        assert_eq!(b.state(), DevServerState::Stopped);
    }
}
