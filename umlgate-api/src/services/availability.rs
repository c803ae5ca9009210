//! Analysis Service Availability
//!
//! Before any upstream call the orchestrator asks this coordinator whether
//! the analysis service is reachable. When it is not, and the service is
//! configured on this machine with autostart on, the coordinator launches it
//! exactly once no matter how many requests noticed the outage at the same
//! time, then waits for it to accept connections.
//!
//! A failed start is remembered. Later callers get the same error straight
//! away until `clear_failure` is called.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use umlgate_core::ServiceError;

use crate::config::ApiConfig;
use crate::constants::{
    INTERPRETER_CANDIDATES, SCRIPT_CANDIDATES, SPAWN_GRACE_MS, STARTUP_POLL_INTERVAL_MS,
};

/// Log target for the child's stdout and stderr.
const PARSER_LOG_TARGET: &str = "umlgate_api::parser";

// ============================================================================
// PROCESS HANDLE
// ============================================================================

/// A launched analysis service process.
///
/// The child itself is owned by a watcher task. Dropping the handle, or
/// calling `stop`, tells the watcher to kill it.
#[derive(Debug)]
pub struct ServiceHandle {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exited: Option<oneshot::Receiver<Option<i32>>>,
}

impl ServiceHandle {
    pub fn new(
        pid: Option<u32>,
        kill: oneshot::Sender<()>,
        exited: oneshot::Receiver<Option<i32>>,
    ) -> Self {
        Self {
            pid,
            kill: Some(kill),
            exited: Some(exited),
        }
    }

    /// A handle for a service this process does not own.
    pub fn unowned() -> Self {
        Self {
            pid: None,
            kill: None,
            exited: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// `Some(code)` once the process has exited.
    pub fn exit_code(&mut self) -> Option<Option<i32>> {
        let exited = self.exited.as_mut()?;
        match exited.try_recv() {
            Ok(code) => Some(code),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(None),
        }
    }

    pub fn stop(mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
            info!(pid = ?self.pid, "Stopping analysis service");
        }
    }
}

// ============================================================================
// LAUNCHER
// ============================================================================

/// Starts the analysis service process.
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// Launch the service and return once it has survived the spawn grace
    /// window. Readiness is checked by the caller.
    async fn launch(&self) -> Result<ServiceHandle, ServiceError>;
}

/// Launches `app.py` with the first Python interpreter that answers
/// `--version`.
#[derive(Debug, Clone)]
pub struct PythonLauncher {
    interpreters: Vec<String>,
    scripts: Vec<PathBuf>,
    port: Option<u16>,
    grace: Duration,
}

impl PythonLauncher {
    /// Candidates from `UMLGATE_PYTHON` / `UMLGATE_PARSER_SCRIPT` first, then
    /// the built-in lists.
    pub fn from_env(port: Option<u16>) -> Self {
        let mut interpreters: Vec<String> = std::env::var("UMLGATE_PYTHON")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .into_iter()
            .collect();
        interpreters.extend(INTERPRETER_CANDIDATES.iter().map(|s| s.to_string()));

        let mut scripts: Vec<PathBuf> = std::env::var("UMLGATE_PARSER_SCRIPT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .into_iter()
            .collect();
        scripts.extend(SCRIPT_CANDIDATES.iter().map(PathBuf::from));

        Self {
            interpreters,
            scripts,
            port,
            grace: Duration::from_millis(SPAWN_GRACE_MS),
        }
    }

    pub fn with_candidates(interpreters: Vec<String>, scripts: Vec<PathBuf>) -> Self {
        Self {
            interpreters,
            scripts,
            port: None,
            grace: Duration::from_millis(SPAWN_GRACE_MS),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// How long a fresh child must survive before `launch` returns.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn resolve_interpreter(&self) -> Result<String, ServiceError> {
        for candidate in &self.interpreters {
            let probe = Command::new(candidate)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status();
            match tokio::time::timeout(Duration::from_secs(5), probe).await {
                Ok(Ok(status)) if status.success() => {
                    debug!(interpreter = %candidate, "Resolved Python interpreter");
                    return Ok(candidate.clone());
                }
                _ => debug!(interpreter = %candidate, "Interpreter candidate unusable"),
            }
        }
        Err(ServiceError::NoInterpreter {
            tried: self.interpreters.clone(),
        })
    }

    async fn resolve_script(&self) -> Result<PathBuf, ServiceError> {
        for candidate in &self.scripts {
            if tokio::fs::metadata(candidate)
                .await
                .is_ok_and(|meta| meta.is_file())
            {
                return Ok(candidate.clone());
            }
        }
        Err(ServiceError::ScriptNotFound {
            tried: self
                .scripts
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        })
    }
}

fn forward_lines<R>(stream: R, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: PARSER_LOG_TARGET, stream = stream_name, "{}", line);
        }
    });
}

#[async_trait]
impl ServiceLauncher for PythonLauncher {
    async fn launch(&self) -> Result<ServiceHandle, ServiceError> {
        let interpreter = self.resolve_interpreter().await?;
        let script = self.resolve_script().await?;
        let workdir = script
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let script_name = script.file_name().map(PathBuf::from).unwrap_or_else(|| script.clone());

        let mut command = Command::new(&interpreter);
        command
            .arg(&script_name)
            .current_dir(workdir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(port) = self.port {
            command.env("PORT", port.to_string());
        }

        let mut child = command.spawn().map_err(|e| ServiceError::SpawnFailed {
            reason: format!("{} {}: {}", interpreter, script.display(), e),
        })?;
        let pid = child.id();
        info!(pid = ?pid, interpreter = %interpreter, script = %script.display(), "Launched analysis service");

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, "stderr");
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, mut exit_rx) = oneshot::channel::<Option<i32>>();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    warn!(pid = ?pid, code = ?code, "Analysis service exited");
                    let _ = exit_tx.send(code);
                }
                // A dropped sender also lands here.
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(pid = ?pid, error = %e, "Failed to kill analysis service");
                    }
                    let _ = exit_tx.send(None);
                }
            }
        });

        if let Ok(Ok(code)) = tokio::time::timeout(self.grace, &mut exit_rx).await {
            return Err(ServiceError::ExitedEarly { code });
        }

        Ok(ServiceHandle::new(pid, kill_tx, exit_rx))
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Failed,
}

/// How the service came to be available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    AlreadyRunning,
    AutoStarted,
}

/// Coordinator state for health and admin output.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub endpoint: String,
    pub autostart_eligible: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_failure: Option<String>,
}

type SharedStart = Shared<BoxFuture<'static, Result<(), ServiceError>>>;

struct SupervisorInner {
    state: SupervisorState,
    in_flight: Option<SharedStart>,
    last_failure: Option<ServiceError>,
    process: Option<ServiceHandle>,
    started_at: Option<DateTime<Utc>>,
}

pub struct AvailabilityCoordinator {
    endpoint: String,
    probe_addr: String,
    autostart_eligible: bool,
    probe_timeout: Duration,
    startup_probe_timeout: Duration,
    poll_interval: Duration,
    launcher: Arc<dyn ServiceLauncher>,
    inner: Mutex<SupervisorInner>,
}

static SHUTDOWN_HOOK: OnceLock<()> = OnceLock::new();

/// Drop the handle of a running service whose process has exited.
fn reap_exited(inner: &mut SupervisorInner) {
    if inner.state != SupervisorState::Running {
        return;
    }
    let Some(code) = inner.process.as_mut().and_then(ServiceHandle::exit_code) else {
        return;
    };
    warn!(code = ?code, "Supervised analysis service is gone");
    inner.process = None;
    inner.state = SupervisorState::Idle;
    inner.started_at = None;
}

fn is_local_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

impl AvailabilityCoordinator {
    pub fn new(
        endpoint: &str,
        autostart: bool,
        probe_timeout: Duration,
        startup_probe_timeout: Duration,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Result<Self, ServiceError> {
        let invalid = |reason: String| ServiceError::ProbeFailed {
            endpoint: endpoint.to_string(),
            reason,
        };
        let url = reqwest::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("endpoint has no host".to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("endpoint has no port".to_string()))?;

        let autostart_eligible = autostart && is_local_host(&host);
        Ok(Self {
            endpoint: endpoint.to_string(),
            probe_addr: format!("{}:{}", host, port),
            autostart_eligible,
            probe_timeout,
            startup_probe_timeout,
            poll_interval: Duration::from_millis(STARTUP_POLL_INTERVAL_MS),
            launcher,
            inner: Mutex::new(SupervisorInner {
                state: SupervisorState::Idle,
                in_flight: None,
                last_failure: None,
                process: None,
                started_at: None,
            }),
        })
    }

    /// Coordinator for `config.upstream_url` that launches with `PythonLauncher`.
    pub fn from_config(config: &ApiConfig) -> Result<Self, ServiceError> {
        let port = reqwest::Url::parse(&config.upstream_url)
            .ok()
            .and_then(|u| u.port_or_known_default());
        Self::new(
            &config.upstream_url,
            config.autostart,
            config.probe_timeout,
            config.startup_probe_timeout,
            Arc::new(PythonLauncher::from_env(port)),
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn autostart_eligible(&self) -> bool {
        self.autostart_eligible
    }

    /// One bounded TCP connect to the service.
    pub async fn probe(&self, timeout: Duration) -> Result<(), ServiceError> {
        let failed = |reason: String| ServiceError::ProbeFailed {
            endpoint: self.endpoint.clone(),
            reason,
        };
        match tokio::time::timeout(timeout, TcpStream::connect(&self.probe_addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(_) => Err(failed(format!("no answer within {}ms", timeout.as_millis()))),
        }
    }

    /// Make sure the service is reachable, starting it if allowed.
    pub async fn ensure_available(self: &Arc<Self>) -> Result<Availability, ServiceError> {
        let probed_at = Utc::now();
        let probe_failure = match self.probe(self.probe_timeout).await {
            Ok(()) => return Ok(Availability::AlreadyRunning),
            Err(e) => e,
        };
        if !self.autostart_eligible {
            return Err(probe_failure);
        }

        let start = {
            let mut inner = self.inner.lock();
            reap_exited(&mut inner);
            if let Some(failure) = &inner.last_failure {
                debug!(error = %failure, "Replaying cached start failure");
                return Err(failure.clone());
            }
            // A start that finished after our probe already covers us.
            if inner.in_flight.is_none()
                && inner.state == SupervisorState::Running
                && inner.started_at.is_some_and(|at| at >= probed_at)
            {
                return Ok(Availability::AutoStarted);
            }
            match &inner.in_flight {
                Some(start) => start.clone(),
                None => {
                    info!(endpoint = %self.endpoint, reason = %probe_failure, "Analysis service unreachable, starting it");
                    let this = Arc::clone(self);
                    let start = async move { this.start_and_wait().await }.boxed().shared();
                    inner.in_flight = Some(start.clone());
                    inner.state = SupervisorState::Starting;
                    start
                }
            }
        };

        start.await?;
        Ok(Availability::AutoStarted)
    }

    async fn start_and_wait(self: Arc<Self>) -> Result<(), ServiceError> {
        let previous = self.inner.lock().process.take();
        if let Some(previous) = previous {
            previous.stop();
        }

        let result = match self.launcher.launch().await {
            Ok(handle) => {
                self.inner.lock().process = Some(handle);
                self.wait_until_ready().await
            }
            Err(e) => Err(e),
        };

        let mut inner = self.inner.lock();
        inner.in_flight = None;
        match &result {
            Ok(()) => {
                inner.state = SupervisorState::Running;
                inner.started_at = Some(Utc::now());
                info!(endpoint = %self.endpoint, "Analysis service is ready");
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Analysis service failed to start");
                inner.state = SupervisorState::Failed;
                inner.last_failure = Some(e.clone());
                if let Some(process) = inner.process.take() {
                    process.stop();
                }
            }
        }
        result
    }

    async fn wait_until_ready(&self) -> Result<(), ServiceError> {
        let started = Instant::now();
        loop {
            let remaining = self.startup_probe_timeout.saturating_sub(started.elapsed());
            if self.probe(self.probe_timeout.min(remaining)).await.is_ok() {
                return Ok(());
            }

            let exit = self
                .inner
                .lock()
                .process
                .as_mut()
                .and_then(ServiceHandle::exit_code);
            if let Some(code) = exit {
                return Err(ServiceError::ExitedEarly { code });
            }

            if started.elapsed() >= self.startup_probe_timeout {
                return Err(ServiceError::NotReady {
                    endpoint: self.endpoint.clone(),
                    waited_ms: self.startup_probe_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Forget a failed start so the next request may try again.
    pub fn clear_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        let cleared = inner.last_failure.take().is_some();
        if inner.state == SupervisorState::Failed {
            inner.state = SupervisorState::Idle;
        }
        cleared
    }

    /// Kill the owned process, if any.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(process) = inner.process.take() {
            process.stop();
        }
        if inner.state == SupervisorState::Running {
            inner.state = SupervisorState::Idle;
        }
        inner.started_at = None;
    }

    pub fn status(&self) -> SupervisorStatus {
        let mut inner = self.inner.lock();
        reap_exited(&mut inner);
        SupervisorStatus {
            state: inner.state,
            endpoint: self.endpoint.clone(),
            autostart_eligible: self.autostart_eligible,
            pid: inner.process.as_ref().and_then(ServiceHandle::pid),
            started_at: inner.started_at,
            last_failure: inner.last_failure.as_ref().map(ToString::to_string),
        }
    }

    /// Stop the owned process on SIGINT or SIGTERM. Only the first call
    /// installs the hook.
    pub fn register_shutdown_hook(self: &Arc<Self>) {
        if SHUTDOWN_HOOK.set(()).is_err() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            shutdown_signal().await;
            this.stop();
        });
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
