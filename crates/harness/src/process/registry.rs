//! Process registry - the single owner of every spawned build and server process

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PitError, PitResult};

/// Time a process gets to exit after SIGTERM before it is killed
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a managed process as observed by its waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
}

/// Handle to one registered process
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub output_file: Option<PathBuf>,
    pub pid: Option<u32>,
    state: watch::Receiver<ProcessState>,
}

impl ManagedProcess {
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        output_file: Option<PathBuf>,
        pid: Option<u32>,
        state: watch::Receiver<ProcessState>,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            started_at: Utc::now(),
            output_file,
            pid,
            state,
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Wait for the process to exit and return its exit code
    pub async fn wait(&self) -> Option<i32> {
        let mut rx = self.state.clone();
        loop {
            let state = *rx.borrow_and_update();
            if let ProcessState::Exited(code) = state {
                return code;
            }
            if rx.changed().await.is_err() {
                // waiter gone without reporting; treat as signalled
                return match *rx.borrow() {
                    ProcessState::Exited(code) => code,
                    ProcessState::Running => None,
                };
            }
        }
    }

    /// Like [`wait`](Self::wait), giving up after `limit`
    pub async fn wait_timeout(&self, limit: Duration) -> Option<Option<i32>> {
        tokio::time::timeout(limit, self.wait()).await.ok()
    }
}

/// How to launch a process
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Registry key; a unique one is generated when absent
    pub id: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Append stdout and stderr to this file
    pub output_file: Option<PathBuf>,
    /// Also mirror output to the console
    pub show_output: bool,
}

impl SpawnOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    pub fn output(mut self, file: impl AsRef<Path>, show_output: bool) -> Self {
        self.output_file = Some(file.as_ref().to_path_buf());
        self.show_output = show_output;
        self
    }
}

/// Spawns, tracks and stops subprocesses
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch a shell command and register it
    async fn spawn(&self, command: &str, options: SpawnOptions) -> PitResult<ManagedProcess>;

    /// Send `signal`, wait for the grace window, then force-kill.
    /// Returns false when nothing is registered under `id`.
    async fn kill_with_signal(&self, id: &str, signal: Signal) -> bool;

    /// Stop every registered process; the registry is empty afterwards
    async fn kill_all(&self);

    /// Ids of the processes currently registered
    fn ids(&self) -> Vec<String>;

    async fn kill(&self, id: &str) -> bool {
        self.kill_with_signal(id, Signal::SIGTERM).await
    }

    /// Spawn and wait for completion, returning the exit code
    async fn run(&self, command: &str, options: SpawnOptions) -> PitResult<Option<i32>> {
        let process = self.spawn(command, options).await?;
        Ok(process.wait().await)
    }

    fn len(&self) -> usize {
        self.ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    token: Uuid,
    pgid: Option<Pid>,
    process: ManagedProcess,
}

/// Registry of real OS processes, each started in its own process group
pub struct ProcessRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    grace: Duration,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::with_grace(KILL_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    /// Registered process by id
    pub fn get(&self, id: &str) -> Option<ManagedProcess> {
        self.entries.lock().get(id).map(|e| e.process.clone())
    }

    /// SIGKILL every process group synchronously; used from the panic hook
    /// where no runtime is available.
    pub fn kill_all_blocking(&self) {
        let mut entries = self.entries.lock();
        for (id, entry) in entries.drain() {
            if let Some(pgid) = entry.pgid {
                debug!(id = %id, "Force killing process group {}", pgid);
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }
    }

    fn remove_if_current(&self, id: &str, token: Uuid) {
        let mut entries = self.entries.lock();
        if entries.get(id).map(|e| e.token == token).unwrap_or(false) {
            entries.remove(id);
        }
    }
}

#[async_trait]
impl ProcessSupervisor for ProcessRegistry {
    async fn spawn(&self, command: &str, options: SpawnOptions) -> PitResult<ManagedProcess> {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| format!("proc-{}", Uuid::new_v4()));

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).stdin(Stdio::null()).process_group(0);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let tee = options.output_file.is_some() && options.show_output;
        match (&options.output_file, options.show_output) {
            (Some(path), false) => {
                let file = open_append(path)?;
                cmd.stdout(Stdio::from(file.try_clone()?));
                cmd.stderr(Stdio::from(file));
            }
            (Some(_), true) => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            (None, true) => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            (None, false) => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| PitError::Process(format!("Failed to spawn '{}': {}", command, e)))?;
        let pid = child.id();

        let mut copiers: Vec<JoinHandle<()>> = Vec::new();
        if tee {
            if let Some(path) = &options.output_file {
                if let Some(stdout) = child.stdout.take() {
                    copiers.push(tee_to_file(stdout, path.clone(), false));
                }
                if let Some(stderr) = child.stderr.take() {
                    copiers.push(tee_to_file(stderr, path.clone(), true));
                }
            }
        }

        let (tx, rx) = watch::channel(ProcessState::Running);
        let process = ManagedProcess::new(&id, command, options.output_file.clone(), pid, rx);
        let token = Uuid::new_v4();
        let pgid = pid.map(|p| Pid::from_raw(p as i32));

        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&id) {
                warn!(id = %id, "Replacing registered process with the same id");
            }
            entries.insert(
                id.clone(),
                Entry {
                    token,
                    pgid,
                    process: process.clone(),
                },
            );
        }
        info!(id = %id, "Started process (pid: {:?}): {}", pid, command);

        let entries = Arc::clone(&self.entries);
        let waiter_id = id.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(id = %waiter_id, "Failed waiting for process: {}", e);
                    None
                }
            };
            for copier in copiers {
                let _ = tokio::time::timeout(Duration::from_secs(2), copier).await;
            }
            {
                let mut entries = entries.lock();
                if entries.get(&waiter_id).map(|e| e.token == token).unwrap_or(false) {
                    entries.remove(&waiter_id);
                }
            }
            debug!(id = %waiter_id, "Process exited with {:?}", code);
            tx.send_replace(ProcessState::Exited(code));
        });

        Ok(process)
    }

    async fn kill_with_signal(&self, id: &str, signal: Signal) -> bool {
        let found = self
            .entries
            .lock()
            .get(id)
            .map(|e| (e.token, e.pgid, e.process.clone()));
        let Some((token, pgid, process)) = found else {
            debug!(id = %id, "No registered process to kill");
            return false;
        };

        if let Some(pgid) = pgid {
            info!(id = %id, "Stopping process (pid: {})", pgid);
            send_to_group(id, pgid, signal);

            if process.wait_timeout(self.grace).await.is_none() {
                warn!(id = %id, "Process did not exit within {:?}, sending SIGKILL", self.grace);
                send_to_group(id, pgid, Signal::SIGKILL);
                let _ = process.wait_timeout(Duration::from_secs(2)).await;
            }
        }

        self.remove_if_current(id, token);
        true
    }

    async fn kill_all(&self) {
        let ids = self.ids();
        if !ids.is_empty() {
            info!("Stopping {} registered process(es)", ids.len());
        }
        join_all(ids.iter().map(|id| self.kill(id))).await;
        self.entries.lock().clear();
    }

    fn ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

fn send_to_group(id: &str, pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(id = %id, "Failed to send {:?} to {}: {}", signal, pgid, e),
    }
}

fn open_append(path: &Path) -> PitResult<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn tee_to_file<R>(mut reader: R, path: PathBuf, to_stderr: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let file = match open_append(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Cannot open {}: {}", path.display(), e);
                return;
            }
        };
        let mut file = tokio::fs::File::from_std(file);
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if file.write_all(&buf[..n]).await.is_err() {
                break;
            }
            if to_stderr {
                let _ = tokio::io::stderr().write_all(&buf[..n]).await;
            } else {
                let _ = tokio::io::stdout().write_all(&buf[..n]).await;
            }
        }
        let _ = file.flush().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_twice_returns_true_then_false() {
        let registry = ProcessRegistry::with_grace(Duration::from_secs(1));
        registry
            .spawn("sleep 30", SpawnOptions::with_id("sleeper"))
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.kill("sleeper").await);
        assert!(!registry.kill("sleeper").await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_natural_exit_deregisters() {
        let registry = ProcessRegistry::new();
        let process = registry
            .spawn("exit 3", SpawnOptions::with_id("quick"))
            .await
            .unwrap();
        assert_eq!(process.wait().await, Some(3));
        assert!(registry.get("quick").is_none());
        assert!(!registry.kill("quick").await);
    }

    #[tokio::test]
    async fn test_term_ignored_escalates_to_kill() {
        let registry = ProcessRegistry::with_grace(Duration::from_millis(300));
        let process = registry
            .spawn("trap '' TERM; sleep 30", SpawnOptions::with_id("stubborn"))
            .await
            .unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(registry.kill("stubborn").await);
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_kill_all_empties_registry() {
        let registry = ProcessRegistry::with_grace(Duration::from_secs(1));
        for i in 0..3 {
            registry
                .spawn("sleep 30", SpawnOptions::with_id(format!("p{}", i)))
                .await
                .unwrap();
        }
        registry.spawn("sleep 30", SpawnOptions::default()).await.unwrap();
        assert_eq!(registry.len(), 4);

        registry.kill_all().await;
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_output_is_appended_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("logs").join("app.out");
        let registry = ProcessRegistry::new();

        let code = registry
            .run("echo first; echo second >&2", SpawnOptions::default().output(&out, false))
            .await
            .unwrap();
        assert_eq!(code, Some(0));
        registry
            .run("echo third", SpawnOptions::default().output(&out, true))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
        assert!(content.contains("third"));
    }

    #[tokio::test]
    async fn test_env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.out");
        let registry = ProcessRegistry::new();
        let options = SpawnOptions::default()
            .cwd(dir.path())
            .env(&[("PIT_MARKER".to_string(), "hello".to_string())])
            .output(&out, false);

        registry.run("echo $PIT_MARKER; pwd", options).await.unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.contains("hello"));
    }
}
