//! Port occupancy checks and recovery

use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Inspect and free the TCP port an application listens on
#[async_trait]
pub trait PortControl: Send + Sync {
    /// Whether something accepts connections on `port`
    async fn is_busy(&self, port: u16) -> bool;

    /// Terminate every process listening on `port`; returns how many were signalled
    async fn kill_occupants(&self, port: u16) -> usize;
}

/// Poll step while waiting for a port to be released
const RELEASE_POLL: Duration = Duration::from_millis(100);

/// Port control backed by the local network stack and `lsof`
#[derive(Debug, Clone)]
pub struct SystemPorts {
    settle: Duration,
    release: Duration,
}

impl Default for SystemPorts {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            release: Duration::from_secs(5),
        }
    }
}

impl SystemPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time given to occupants to release the port after SIGTERM
    pub fn with_settle(settle: Duration) -> Self {
        Self {
            settle,
            ..Self::default()
        }
    }

    /// Wait until nothing accepts connections on `port`; false once `limit` elapsed
    async fn wait_released(&self, port: u16, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.is_busy(port).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(RELEASE_POLL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    async fn listening_pids(&self, port: u16) -> Vec<i32> {
        if which::which("lsof").is_err() {
            warn!("lsof not found, cannot find processes using port {}", port);
            return Vec::new();
        }
        let output = match Command::new("lsof")
            .arg(format!("-ti:{}", port))
            .output()
            .await
        {
            Ok(o) => o,
            Err(e) => {
                warn!("Failed to run lsof: {}", e);
                return Vec::new();
            }
        };
        let own = std::process::id() as i32;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| l.trim().parse::<i32>().ok())
            .filter(|pid| *pid != own)
            .collect()
    }
}

#[async_trait]
impl PortControl for SystemPorts {
    async fn is_busy(&self, port: u16) -> bool {
        matches!(
            timeout(Duration::from_secs(1), TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }

    async fn kill_occupants(&self, port: u16) -> usize {
        let pids = self.listening_pids(port).await;
        if pids.is_empty() {
            debug!("No process found listening on port {}", port);
            return 0;
        }

        info!("Killing processes using port {}: {:?}", port, pids);
        for pid in &pids {
            if let Err(e) = kill(Pid::from_raw(*pid), Signal::SIGTERM) {
                warn!("Failed to terminate {}: {}", pid, e);
            }
        }
        if self.wait_released(port, self.settle).await {
            return pids.len();
        }

        for pid in &pids {
            // signal None only probes for existence
            if kill(Pid::from_raw(*pid), None).is_ok() {
                warn!("Process {} still alive, sending SIGKILL", pid);
                let _ = kill(Pid::from_raw(*pid), Signal::SIGKILL);
            }
        }
        if !self.wait_released(port, self.release).await {
            warn!("Port {} still busy {}s after SIGKILL", port, self.release.as_secs());
        }
        pids.len()
    }
}
