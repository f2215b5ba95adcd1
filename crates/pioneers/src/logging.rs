use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Log to stderr, or append to `file` when given. Producers always get
/// stderr: their stdout is the packet channel.
pub fn init_logging(format: LogFormat, level: LogLevel, file: Option<&Path>) {
    let sink = file.and_then(|path| match open_log(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("warning: cannot open log file {}: {err}", path.display());
            None
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    let _ = match (format, sink) {
        (LogFormat::Text, None) => builder.with_writer(std::io::stderr).try_init(),
        (LogFormat::Json, None) => builder.json().with_writer(std::io::stderr).try_init(),
        (LogFormat::Text, Some(file)) => builder.with_writer(Mutex::new(file)).try_init(),
        (LogFormat::Json, Some(file)) => builder.json().with_writer(Mutex::new(file)).try_init(),
    };
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
