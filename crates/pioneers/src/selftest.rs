//! Pre-flight checks, run from the CLI or by remote command.

use std::path::{Path, PathBuf};

use pioneers_transport::RemoteLink;
use serde::Serialize;

use crate::config::{DeviceSpec, ProducerSpec, StorageConfig};
use crate::gpio::InputPin;
use crate::status::Severity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            CheckStatus::Pass | CheckStatus::Warn => Severity::Info,
            CheckStatus::Fail => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }

    /// Compact form for a status packet, e.g. `data:PASS`.
    pub fn short(&self) -> String {
        format!("{}:{}", self.name, self.status.as_str())
    }
}

/// Worst status among `checks`; an empty list passes.
pub fn overall(checks: &[CheckResult]) -> CheckStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max_by_key(|s| *s as u8)
        .unwrap_or(CheckStatus::Pass)
}

/// Each store must exist (or be creatable) and accept a file.
pub fn check_storage(storage: &StorageConfig) -> Vec<CheckResult> {
    storage
        .dirs()
        .into_iter()
        .map(|(name, dir)| match check_writable(dir) {
            Ok(()) => CheckResult::new(name, CheckStatus::Pass, dir.display().to_string()),
            Err(err) => CheckResult::new(
                name,
                CheckStatus::Fail,
                format!("{} not writable: {err}", dir.display()),
            ),
        })
        .collect()
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let marker = dir.join(format!(".pioneers-selftest-{}", std::process::id()));
    std::fs::write(&marker, b"ok")?;
    std::fs::remove_file(&marker)
}

/// Read an event line once; report its electrical level.
pub fn check_input<P: InputPin + ?Sized>(name: &str, pin: &mut P) -> CheckResult {
    match pin.read() {
        Ok(high) => CheckResult::new(
            name,
            CheckStatus::Pass,
            if high { "high (released)" } else { "low (asserted)" },
        ),
        Err(err) => CheckResult::new(name, CheckStatus::Fail, err.to_string()),
    }
}

/// A missing link is not fatal for the mission, so it only warns.
pub fn check_link(link: Option<&dyn RemoteLink>) -> CheckResult {
    match link {
        Some(link) if link.is_connected() => {
            CheckResult::new("link", CheckStatus::Pass, format!("{} connected", link.describe()))
        }
        Some(link) => CheckResult::new(
            "link",
            CheckStatus::Warn,
            format!("{} not connected", link.describe()),
        ),
        None => CheckResult::new("link", CheckStatus::Warn, "no link configured"),
    }
}

/// The producer's program must resolve and its device must exist.
pub fn check_producer(spec: &ProducerSpec, exe: &Path) -> CheckResult {
    let name = format!("producer:{}", spec.name);
    if let Some(argv) = &spec.command {
        return match argv.first().and_then(|p| resolve_program(p)) {
            Some(path) => CheckResult::new(name, CheckStatus::Pass, path.display().to_string()),
            None => CheckResult::new(
                name,
                CheckStatus::Fail,
                format!("command {:?} not found", argv.first().map(String::as_str).unwrap_or("")),
            ),
        };
    }
    if !exe.is_file() {
        return CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("worker binary {} missing", exe.display()),
        );
    }
    let device = match &spec.device {
        DeviceSpec::Sim { .. } => None,
        DeviceSpec::I2c { bus } => Some(bus),
        DeviceSpec::Imp { path, .. } => Some(path),
    };
    match device {
        Some(path) if !path.exists() => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("device {} missing", path.display()),
        ),
        Some(path) => CheckResult::new(name, CheckStatus::Pass, path.display().to_string()),
        None => CheckResult::new(name, CheckStatus::Pass, "simulated sensor"),
    }
}

/// Absolute or relative paths are taken as given; bare names search `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}
