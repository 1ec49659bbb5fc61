//! BrowserSupervisor: launches the sandbox browser and owns the single
//! teardown sequence.
//!
//! # Teardown (for every trigger)
//!
//! ```text
//! browser exits (code | signal)
//!   └─ stop API server      (errors logged, never fatal)
//!   └─ remove `api` file    (errors logged)
//!   └─ return the browser's exit code to main()
//! ```
//!
//! SIGINT, SIGTERM and SIGQUIT received by the host are forwarded to the
//! browser and nothing else.  The browser's exit then drives teardown, so
//! there is exactly one teardown path whatever stopped the browser.
//!
//! # Stop escalation
//!
//! When the host itself has to stop the browser (the optional handshake
//! timeout), it escalates:
//!
//! | Signal  | Grace period |
//! |---------|--------------|
//! | SIGINT  | 1 s          |
//! | SIGTERM | 2 s          |
//! | SIGQUIT | 5 s          |
//! | SIGKILL | 5 s          |

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::config::HostConfig;
use crate::infrastructure::address_file::AddressFile;
use crate::infrastructure::api_server::RunningServer;

const ESCALATION: [(StopSignal, Duration); 4] = [
    (StopSignal::Interrupt, Duration::from_secs(1)),
    (StopSignal::Terminate, Duration::from_secs(2)),
    (StopSignal::Quit, Duration::from_secs(5)),
    (StopSignal::Kill, Duration::from_secs(5)),
];

/// Errors raised while running the browser process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch browser '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for the browser process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to send {signal} to the browser: {reason}")]
    Signal { signal: StopSignal, reason: String },

    #[error("browser process is still running after SIGKILL")]
    Unstoppable,
}

/// Signals the host sends to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
    Quit,
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Quit => "SIGQUIT",
            StopSignal::Kill => "SIGKILL",
        })
    }
}

#[cfg(unix)]
impl From<StopSignal> for nix::sys::signal::Signal {
    fn from(signal: StopSignal) -> Self {
        use nix::sys::signal::Signal;
        match signal {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Quit => Signal::SIGQUIT,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// How the browser process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with this code.
    Code(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }
        ExitOutcome::Code(1)
    }

    /// The code the host exits with: the code itself, or `128 + N` for
    /// signal `N`.
    pub fn exit_code(self) -> i32 {
        match self {
            ExitOutcome::Code(code) => code,
            ExitOutcome::Signaled(signal) => 128 + signal,
        }
    }
}

/// Browser command-line flags, in launch order.
pub fn launch_args(debug: bool, user_data_dir: &Path, entry_uri: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(12);
    if !debug {
        args.push("--headless".to_string());
    }
    args.push(format!("--user-data-dir={}", user_data_dir.display()));
    args.extend(
        [
            "--no-default-browser-check",
            "--no-first-run",
            "--disable-default-apps",
            "--disable-popup-blocking",
            "--disable-translate",
            "--disable-background-timer-throttling",
            "--disable-renderer-backgrounding",
            "--disable-device-discovery-notifications",
            "--remote-debugging-port=0",
        ]
        .map(String::from),
    );
    args.push(entry_uri.to_string());
    args
}

// ── Process handle ────────────────────────────────────────────────────────────

/// The running browser process.
pub struct BrowserProcessHandle {
    child: Child,
    pid: Option<u32>,
    last_exit: Option<ExitOutcome>,
}

impl BrowserProcessHandle {
    /// Spawns `command`.  Stdin is always closed.
    pub fn spawn(mut command: Command) -> Result<Self, SupervisorError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let child = command
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;
        let pid = child.id();
        Ok(Self {
            child,
            pid,
            last_exit: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit observed by [`BrowserProcessHandle::wait`], if any.
    pub fn last_exit(&self) -> Option<ExitOutcome> {
        self.last_exit
    }

    /// `true` until the process has been reaped.
    pub fn is_alive(&mut self) -> bool {
        if self.last_exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.last_exit = Some(ExitOutcome::from_status(status));
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Waits for the process to exit.  Cancel-safe.
    pub async fn wait(&mut self) -> Result<ExitOutcome, SupervisorError> {
        if let Some(outcome) = self.last_exit {
            return Ok(outcome);
        }
        let status = self.child.wait().await.map_err(SupervisorError::Wait)?;
        let outcome = ExitOutcome::from_status(status);
        self.last_exit = Some(outcome);
        Ok(outcome)
    }

    /// Sends `signal` to the process.
    #[cfg(unix)]
    pub fn signal(&mut self, signal: StopSignal) -> Result<(), SupervisorError> {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let pid = self
            .pid
            .filter(|_| self.last_exit.is_none())
            .ok_or_else(|| SupervisorError::Signal {
                signal,
                reason: "process already reaped".to_string(),
            })?;
        let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
            signal,
            reason: format!("pid {pid} out of range"),
        })?;
        kill(Pid::from_raw(raw), nix::sys::signal::Signal::from(signal)).map_err(|errno| {
            SupervisorError::Signal {
                signal,
                reason: errno.to_string(),
            }
        })
    }

    /// Sends `signal` to the process.  Every signal terminates it.
    #[cfg(not(unix))]
    pub fn signal(&mut self, signal: StopSignal) -> Result<(), SupervisorError> {
        self.child
            .start_kill()
            .map_err(|e| SupervisorError::Signal {
                signal,
                reason: e.to_string(),
            })
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Launches the browser with the host's flag set.
#[derive(Debug, Clone)]
pub struct BrowserSupervisor {
    program: String,
    debug: bool,
    user_data_dir: PathBuf,
}

impl BrowserSupervisor {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            program: config.browser_bin.clone(),
            debug: config.debug,
            user_data_dir: config.user_data_dir(),
        }
    }

    /// Starts the browser pointed at `entry_uri`.
    pub fn spawn(&self, entry_uri: &str) -> Result<BrowserProcessHandle, SupervisorError> {
        let args = launch_args(self.debug, &self.user_data_dir, entry_uri);
        let mut command = Command::new(&self.program);
        command.args(&args);
        if !self.debug {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let handle = BrowserProcessHandle::spawn(command)?;
        info!(
            program = %self.program,
            pid = handle.pid().unwrap_or_default(),
            headless = !self.debug,
            "browser launched"
        );
        Ok(handle)
    }
}

/// The two teardown steps that follow the browser's exit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Teardown: Send + Sync {
    async fn stop_api_server(&self);
    async fn remove_address_file(&self);
}

/// Teardown over the running server and the `api` file.
pub struct HostTeardown {
    server: Arc<RunningServer>,
    address_file: AddressFile,
}

impl HostTeardown {
    pub fn new(server: Arc<RunningServer>, address_file: AddressFile) -> Self {
        Self {
            server,
            address_file,
        }
    }
}

#[async_trait]
impl Teardown for HostTeardown {
    async fn stop_api_server(&self) {
        self.server.stop().await;
    }

    async fn remove_address_file(&self) {
        match self.address_file.remove().await {
            Ok(()) => debug!(path = %self.address_file.path().display(), "address file removed"),
            Err(e) => warn!(
                path = %self.address_file.path().display(),
                "could not remove address file: {e}"
            ),
        }
    }
}

/// Runs the browser to completion, then tears down.
///
/// - Host signals are forwarded to the browser.
/// - `ready` resolves when the handshake completes.  With a
///   `handshake_timeout`, a browser that has not completed it in time is
///   stopped by escalation.
///
/// Returns the exit code the host should exit with.
pub async fn supervise<F>(
    mut handle: BrowserProcessHandle,
    teardown: &dyn Teardown,
    ready: F,
    handshake_timeout: Option<Duration>,
) -> i32
where
    F: Future<Output = ()>,
{
    let mut signals = ForwardedSignals::install();

    let handshake = async move {
        match handshake_timeout {
            Some(limit) => timeout(limit, ready).await.is_ok(),
            None => {
                ready.await;
                true
            }
        }
    };
    tokio::pin!(handshake);
    let mut handshake_settled = false;

    let outcome = loop {
        tokio::select! {
            result = handle.wait() => break result,
            signal = signals.next() => {
                info!("received {signal}, forwarding to browser");
                if let Err(e) = handle.signal(signal) {
                    warn!("{e}");
                }
            }
            completed = &mut handshake, if !handshake_settled => {
                handshake_settled = true;
                if completed {
                    info!("handshake complete, node is ready");
                } else {
                    error!("sandbox did not complete the handshake in time, stopping browser");
                    break stop_with_escalation(&mut handle).await;
                }
            }
        }
    };

    let code = match outcome {
        Ok(exit) => {
            info!(?exit, "browser exited");
            exit.exit_code()
        }
        Err(e) => {
            error!("{e}");
            1
        }
    };

    teardown.stop_api_server().await;
    teardown.remove_address_file().await;
    code
}

/// Stops the browser by escalating through [`ESCALATION`].
pub async fn stop_with_escalation(
    handle: &mut BrowserProcessHandle,
) -> Result<ExitOutcome, SupervisorError> {
    for (signal, grace) in ESCALATION {
        if let Err(e) = handle.signal(signal) {
            warn!("{e}");
        }
        match timeout(grace, handle.wait()).await {
            Ok(result) => return result,
            Err(_) => debug!("browser still running {grace:?} after {signal}"),
        }
    }
    Err(SupervisorError::Unstoppable)
}

// ── Host signals ──────────────────────────────────────────────────────────────

#[cfg(unix)]
struct ForwardedSignals {
    inner: Option<UnixSignals>,
}

#[cfg(unix)]
struct UnixSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ForwardedSignals {
    fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let installed = (|| -> io::Result<UnixSignals> {
            Ok(UnixSignals {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                quit: signal(SignalKind::quit())?,
            })
        })();

        match installed {
            Ok(signals) => Self {
                inner: Some(signals),
            },
            Err(e) => {
                warn!("signal forwarding unavailable: {e}");
                Self { inner: None }
            }
        }
    }

    async fn next(&mut self) -> StopSignal {
        let Some(signals) = self.inner.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            _ = signals.interrupt.recv() => StopSignal::Interrupt,
            _ = signals.terminate.recv() => StopSignal::Terminate,
            _ = signals.quit.recv() => StopSignal::Quit,
        }
    }
}

#[cfg(not(unix))]
struct ForwardedSignals;

#[cfg(not(unix))]
impl ForwardedSignals {
    fn install() -> Self {
        Self
    }

    async fn next(&mut self) -> StopSignal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => StopSignal::Interrupt,
            Err(_) => std::future::pending().await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
