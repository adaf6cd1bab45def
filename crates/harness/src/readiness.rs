//! Readiness polling - deciding when a freshly started server is usable
//!
//! Three gates are available: a regex over the captured output, a plain HTTP
//! probe, and the dev-mode frontend-pending header. Every poll attempt returns
//! a [`PollOutcome`]; expected negative answers (file missing, connection
//! refused) are `Pending`, never errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{CheckedLocation, PitError, PitResult};

/// Response header present while the dev server is still compiling the frontend
pub const FRONTEND_PENDING_HEADER: &str = "X-DevModePending";

/// Extra files looked at next to the primary output file
pub const FALLBACK_LOG_FILES: &[&str] = &["server.log", "output.log"];

const LAST_LINES: usize = 5;

/// Result of a single poll attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not ready yet, keep polling
    Pending,
    Ready,
    /// Will never become ready
    Failed(String),
}

/// What the HTTP probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// The frontend-pending header was present
    pub frontend_pending: bool,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
    }
}

/// Low-level HTTP access used by the readiness gates and the servlet check
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Issue one GET. An error means no response at all.
    async fn get(&self, url: &str) -> PitResult<ProbeResponse>;
}

/// [`HttpProbe`] over reqwest with a short per-request timeout
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new() -> PitResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str) -> PitResult<ProbeResponse> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(ProbeResponse {
            status: resp.status().as_u16(),
            content_type,
            frontend_pending: resp.headers().contains_key(FRONTEND_PENDING_HEADER),
        })
    }
}

/// Sleep between attempts of each gate
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub log: Duration,
    pub http: Duration,
    pub frontend: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            log: Duration::from_secs(4),
            http: Duration::from_secs(2),
            frontend: Duration::from_secs(3),
        }
    }
}

pub struct ReadinessPoller {
    probe: Arc<dyn HttpProbe>,
    intervals: PollIntervals,
    fallbacks: Vec<String>,
}

impl ReadinessPoller {
    pub fn new(probe: Arc<dyn HttpProbe>) -> Self {
        Self {
            probe,
            intervals: PollIntervals::default(),
            fallbacks: FALLBACK_LOG_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_fallbacks(mut self, names: Vec<String>) -> Self {
        self.fallbacks = names;
        self
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    /// Primary file followed by the fallbacks that live next to it
    fn candidate_files(&self, primary: &Path) -> Vec<PathBuf> {
        let dir = primary.parent().unwrap_or_else(|| Path::new("."));
        let mut files = vec![primary.to_path_buf()];
        for name in &self.fallbacks {
            let candidate = dir.join(name);
            if candidate != primary {
                files.push(candidate);
            }
        }
        files
    }

    /// Wait until `pattern` matches the full content of the output file or
    /// one of its fallbacks. Returns the file that matched.
    pub async fn wait_for_log_message(
        &self,
        primary: &Path,
        pattern: &str,
        timeout: Duration,
    ) -> PitResult<PathBuf> {
        let re = Regex::new(pattern)?;
        let files = self.candidate_files(primary);
        let deadline = Instant::now() + timeout;
        debug!("Waiting for '{}' in {}", pattern, primary.display());

        loop {
            for file in &files {
                if poll_log(file, &re).await == PollOutcome::Ready {
                    info!("Found startup message '{}' in {}", pattern, file.display());
                    return Ok(file.clone());
                }
            }
            if !sleep_until_next(deadline, self.intervals.log).await {
                break;
            }
        }

        let mut checked = Vec::with_capacity(files.len());
        for file in &files {
            checked.push(CheckedLocation {
                location: file.display().to_string(),
                last_lines: last_lines(file, LAST_LINES).await,
            });
        }
        Err(PitError::Timeout {
            waiting_for: format!("message '{}'", pattern),
            seconds: timeout.as_secs(),
            checked,
        })
    }

    /// Wait until `url` answers with a status below 400
    pub async fn wait_for_http(&self, url: &str, timeout: Duration) -> PitResult<()> {
        let deadline = Instant::now() + timeout;

        let last = loop {
            let last = match self.probe.get(url).await {
                Ok(resp) if resp.is_success() => {
                    info!("Server responded at {} ({})", url, resp.status);
                    return Ok(());
                }
                Ok(resp) => format!("status {}", resp.status),
                Err(e) => e.to_string(),
            };
            if !sleep_until_next(deadline, self.intervals.http).await {
                break last;
            }
        };

        Err(PitError::Timeout {
            waiting_for: format!("HTTP response from {}", url),
            seconds: timeout.as_secs(),
            checked: vec![CheckedLocation {
                location: url.to_string(),
                last_lines: vec![last],
            }],
        })
    }

    /// Wait until the dev server stops reporting a pending frontend build
    pub async fn wait_for_frontend(&self, url: &str, timeout: Duration) -> PitResult<()> {
        let deadline = Instant::now() + timeout;
        let started = Instant::now();

        loop {
            match self.poll_frontend(url).await {
                PollOutcome::Ready => {
                    info!(
                        "Frontend compiled and dev-mode ready after {}s",
                        started.elapsed().as_secs()
                    );
                    return Ok(());
                }
                PollOutcome::Failed(reason) => return Err(PitError::Frontend(reason)),
                PollOutcome::Pending => {}
            }
            if !sleep_until_next(deadline, self.intervals.frontend).await {
                break;
            }
        }

        Err(PitError::Timeout {
            waiting_for: format!("frontend compilation at {}", url),
            seconds: timeout.as_secs(),
            checked: vec![CheckedLocation {
                location: url.to_string(),
                last_lines: vec![format!("{} still present", FRONTEND_PENDING_HEADER)],
            }],
        })
    }

    async fn poll_frontend(&self, url: &str) -> PollOutcome {
        match self.probe.get(url).await {
            Ok(resp) if resp.frontend_pending => PollOutcome::Pending,
            Ok(resp) if resp.is_success() => PollOutcome::Ready,
            Ok(resp) => PollOutcome::Failed(format!("{} answered {}", url, resp.status)),
            Err(e) => {
                debug!("Frontend check failed: {}", e);
                PollOutcome::Pending
            }
        }
    }

    /// Confirm the application root serves HTML, retrying a fixed number of times
    pub async fn check_servlet(&self, url: &str, attempts: usize, delay: Duration) -> PitResult<()> {
        for attempt in 1..=attempts {
            match self.probe.get(url).await {
                Ok(resp) if resp.is_success() && resp.is_html() => {
                    info!("HTTP servlet is responding at {}", url);
                    return Ok(());
                }
                Ok(resp) => debug!(
                    "Servlet check attempt {} got {} ({:?})",
                    attempt, resp.status, resp.content_type
                ),
                Err(e) => debug!("Servlet check attempt {} failed: {}", attempt, e),
            }
            if attempt < attempts {
                sleep(delay).await;
            }
        }
        warn!("HTTP servlet check failed for {}", url);
        Err(PitError::ServletCheck {
            url: url.to_string(),
            attempts,
        })
    }
}

async fn poll_log(file: &Path, re: &Regex) -> PollOutcome {
    match tokio::fs::read(file).await {
        Ok(bytes) if re.is_match(&String::from_utf8_lossy(&bytes)) => PollOutcome::Ready,
        Ok(_) => PollOutcome::Pending,
        Err(_) => PollOutcome::Pending,
    }
}

/// Sleep one interval, clamped to the deadline. Returns false once the
/// deadline has passed.
async fn sleep_until_next(deadline: Instant, interval: Duration) -> bool {
    let now = Instant::now();
    if now >= deadline {
        return false;
    }
    sleep(interval.min(deadline - now)).await;
    true
}

/// Last non-empty lines of a file; empty when it cannot be read
pub async fn last_lines(file: &Path, count: usize) -> Vec<String> {
    match tokio::fs::read(file).await {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            lines[lines.len().saturating_sub(count)..]
                .iter()
                .map(|l| l.to_string())
                .collect()
        }
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedProbe {
        responses: Mutex<VecDeque<PitResult<ProbeResponse>>>,
    }

    impl ScriptedProbe {
        fn new(responses: Vec<PitResult<ProbeResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl HttpProbe for ScriptedProbe {
        async fn get(&self, _url: &str) -> PitResult<ProbeResponse> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(PitError::Process("connection refused".into())))
        }
    }

    fn ok(status: u16, pending: bool) -> PitResult<ProbeResponse> {
        Ok(ProbeResponse {
            status,
            content_type: Some("text/html;charset=utf-8".to_string()),
            frontend_pending: pending,
        })
    }

    fn fast() -> PollIntervals {
        PollIntervals {
            log: Duration::from_millis(20),
            http: Duration::from_millis(20),
            frontend: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_log_message_found_in_fallback_file() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("app-dev-current-linux.out");
        std::fs::write(&primary, "Compiling...\n").unwrap();
        std::fs::write(dir.path().join("server.log"), "Started Application in 3s\n").unwrap();

        let poller = ReadinessPoller::new(ScriptedProbe::new(vec![])).with_intervals(fast());
        let found = poller
            .wait_for_log_message(&primary, "Started .*Application", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(found.ends_with("server.log"));
    }

    #[tokio::test]
    async fn test_log_timeout_lists_checked_files() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("app.out");
        std::fs::write(&primary, "line one\nstill compiling\n").unwrap();

        let poller = ReadinessPoller::new(ScriptedProbe::new(vec![])).with_intervals(fast());
        let err = poller
            .wait_for_log_message(&primary, "Started", Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            PitError::Timeout { checked, .. } => {
                assert_eq!(checked.len(), 3);
                assert_eq!(checked[0].last_lines, vec!["line one", "still compiling"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_http_waits_through_errors() {
        let probe = ScriptedProbe::new(vec![
            Err(PitError::Process("refused".into())),
            ok(503, false),
            ok(200, false),
        ]);
        let poller = ReadinessPoller::new(probe).with_intervals(fast());
        poller
            .wait_for_http("http://localhost:8080", Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_timeout_reports_last_status() {
        let probe = ScriptedProbe::new(vec![
            Err(PitError::Process("refused".into())),
            ok(503, false),
            ok(502, false),
        ]);
        let poller = ReadinessPoller::new(probe.clone()).with_intervals(fast());
        let err = poller
            .wait_for_http("http://localhost:8080", Duration::from_millis(150))
            .await
            .unwrap_err();
        match err {
            PitError::Timeout { checked, .. } => {
                assert_eq!(checked[0].location, "http://localhost:8080");
                // scripted responses run out long before the deadline
                assert!(checked[0].last_lines[0].contains("connection refused"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(probe.responses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_frontend_error_status_fails_fast() {
        let probe = ScriptedProbe::new(vec![ok(200, true), ok(500, false)]);
        let poller = ReadinessPoller::new(probe).with_intervals(fast());
        let err = poller
            .wait_for_frontend("http://localhost:8080", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "frontend");
    }

    #[tokio::test]
    async fn test_frontend_waits_for_header_to_clear() {
        let probe = ScriptedProbe::new(vec![ok(200, true), ok(200, true), ok(200, false)]);
        let poller = ReadinessPoller::new(probe.clone()).with_intervals(fast());
        poller
            .wait_for_frontend("http://localhost:8080", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(probe.responses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_servlet_check_requires_html() {
        let json = Ok(ProbeResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            frontend_pending: false,
        });
        let probe = ScriptedProbe::new(vec![json]);
        let poller = ReadinessPoller::new(probe).with_intervals(fast());
        let err = poller
            .check_servlet("http://localhost:8080", 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PitError::ServletCheck { attempts: 2, .. }));
    }
}
