use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::worker::WorkerExit;

/// Longest single wait between exit checks while stopping.
const STOP_POLL: Duration = Duration::from_millis(20);

/// How to launch a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ProducerConfig {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Two-phase stop: polite requests first, then a kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Termination requests sent before escalating.
    pub retries: u32,
    /// Wait after each request.
    pub interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            interval: Duration::from_secs(1),
        }
    }
}

/// What the supervisor knows about a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exited with status 0, or terminated after being asked to stop.
    ExitedOk,
    /// Exited on its own with a failure status.
    ExitedFault,
    /// Had to be killed.
    Killed,
}

impl Liveness {
    pub fn is_running(self) -> bool {
        self == Liveness::Running
    }
}

/// A spawned child with liveness tracking and a two-phase stop.
#[derive(Debug)]
pub struct ManagedChild {
    config: ProducerConfig,
    child: Child,
    started: Instant,
    liveness: Liveness,
    status: Option<ExitStatus>,
    stop_requested: bool,
}

impl ManagedChild {
    /// Start `config` with the given stdout; stdin is null and stderr is
    /// inherited so the child's logs reach the console.
    pub fn spawn(config: ProducerConfig, stdout: Stdio) -> Result<Self, ProcessError> {
        let child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                name: config.name.clone(),
                source,
            })?;

        info!(name = %config.name, pid = child.id(), program = %config.program.display(), "process spawned");
        Ok(Self {
            config,
            child,
            started: Instant::now(),
            liveness: Liveness::Running,
            status: None,
            stop_requested: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Last observed liveness, without probing the process.
    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Check on the process without blocking.
    pub fn check_liveness(&mut self) -> Liveness {
        if !self.liveness.is_running() {
            return self.liveness;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => self.record_exit(status),
            Ok(None) => {}
            Err(err) => {
                warn!(name = %self.config.name, error = %err, "failed to poll process");
            }
        }
        self.liveness
    }

    /// The error describing an unrequested exit, if that is what happened.
    pub fn exit_error(&self) -> Option<ProcessError> {
        if self.liveness != Liveness::ExitedFault {
            return None;
        }
        Some(ProcessError::ExitedUnexpectedly {
            name: self.config.name.clone(),
            status: self.status.map(describe_status).unwrap_or_default(),
        })
    }

    /// SIGTERM up to `policy.retries` times, waiting `policy.interval` after
    /// each, then SIGKILL.
    ///
    /// Blocks for as long as the child takes to go away. Returns the final
    /// liveness; an error only when the child could not be signalled or
    /// reaped at all.
    pub fn stop(&mut self, policy: &StopPolicy) -> Result<Liveness, ProcessError> {
        self.stop_requested = true;
        if !self.check_liveness().is_running() {
            return Ok(self.liveness);
        }

        let pid = self.pid();
        for attempt in 1..=policy.retries {
            debug!(name = %self.config.name, pid, attempt, "sending SIGTERM");
            self.signal(libc::SIGTERM)?;
            if self.wait_for_exit(policy.interval) {
                info!(name = %self.config.name, pid, attempt, liveness = ?self.liveness, "process stopped");
                return Ok(self.liveness);
            }
        }

        let timeout = ProcessError::KillTimeout {
            name: self.config.name.clone(),
            pid,
            attempts: policy.retries,
        };
        warn!(error = %timeout, "escalating to SIGKILL");
        let signal_err = |source| ProcessError::Signal {
            name: self.config.name.clone(),
            pid,
            source,
        };
        if let Err(err) = self.child.kill() {
            // Already reaped since the last check.
            if err.kind() != std::io::ErrorKind::InvalidInput {
                return Err(signal_err(err));
            }
        }
        let status = self.child.wait().map_err(signal_err)?;
        self.status = Some(status);
        self.liveness = Liveness::Killed;
        Ok(self.liveness)
    }

    fn signal(&mut self, signal: libc::c_int) -> Result<(), ProcessError> {
        let pid = self.pid();
        // SAFETY: kill(2) has no memory-safety preconditions; `pid` is our own
        // child, which stays a zombie (so the pid is not reused) until waited.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(ProcessError::Signal {
                    name: self.config.name.clone(),
                    pid,
                    source: err,
                });
            }
        }
        Ok(())
    }

    fn wait_for_exit(&mut self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !self.check_liveness().is_running() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        self.status = Some(status);
        self.liveness = classify(status, self.stop_requested);
        debug!(
            name = %self.config.name,
            status = %describe_status(status),
            liveness = ?self.liveness,
            "process exited"
        );
    }
}

fn classify(status: ExitStatus, stop_requested: bool) -> Liveness {
    match (status.code(), status.signal()) {
        (Some(0), _) => Liveness::ExitedOk,
        (_, Some(libc::SIGTERM)) if stop_requested => Liveness::ExitedOk,
        (_, Some(libc::SIGKILL)) => Liveness::Killed,
        _ => Liveness::ExitedFault,
    }
}

/// Render an exit status, naming known worker exit codes.
pub fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => match WorkerExit::from_code(code) {
            Some(exit) => format!("exit code {code}: {exit}"),
            None => format!("exit code {code}"),
        },
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown status".to_string(),
    }
}
