use std::path::PathBuf;

/// Errors from managing producer processes.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The producer could not be started; the start attempt is abandoned.
    #[error("failed to spawn producer '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    /// The producer exited without being asked to.
    #[error("producer '{name}' exited unexpectedly ({status})")]
    ExitedUnexpectedly { name: String, status: String },

    /// The producer ignored every termination request.
    #[error("producer '{name}' (pid {pid}) did not stop after {attempts} termination requests")]
    KillTimeout {
        name: String,
        pid: u32,
        attempts: u32,
    },

    /// Delivering a signal or reaping the process failed.
    #[error("failed to signal producer '{name}' (pid {pid}): {source}")]
    Signal {
        name: String,
        pid: u32,
        source: std::io::Error,
    },
}

/// Errors raised by a sensor inside a producer process.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        source: std::io::Error,
    },

    #[error("bus error on {device}: {source}")]
    Bus {
        device: String,
        source: std::io::Error,
    },

    #[error("short read from {device} ({got} of {expected} bytes)")]
    ShortRead {
        device: String,
        got: usize,
        expected: usize,
    },

    #[error("{device} did not answer within {timeout_ms} ms")]
    Timeout { device: String, timeout_ms: u64 },

    /// Fault injected by the simulated sensor.
    #[error("simulated fault after {0} samples")]
    Injected(u64),
}

/// Errors writing the local backup files.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
