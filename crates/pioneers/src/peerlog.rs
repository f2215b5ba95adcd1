//! Backup of everything the other node sends us.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};

use pioneers_frame::{ids, IdClass, Message};
use tracing::{debug, warn};

/// Appends one line per inbound packet; opened on first use.
#[derive(Debug)]
pub struct PeerLog {
    path: PathBuf,
    file: Option<LineWriter<File>>,
    lines: u64,
}

impl PeerLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            lines: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Append `message`. Failures are logged and the line is lost; the file
    /// is reopened on the next call.
    pub fn record(&mut self, message: &Message) {
        let line = format_line(message);
        if let Err(err) = self.write_line(&line) {
            warn!(path = %self.path.display(), error = %err, "peer log write failed");
            self.file = None;
        }
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            debug!(path = %self.path.display(), "peer log opened");
            self.file = Some(LineWriter::new(file));
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{line}")?;
            self.lines += 1;
        }
        Ok(())
    }
}

/// `name,index,fields`: text for status and message packets, decimal bytes
/// otherwise.
fn format_line(message: &Message) -> String {
    let body = match IdClass::of(message.id) {
        IdClass::Status | IdClass::Message => message.text(),
        _ => message
            .data()
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(","),
    };
    format!("{},{},{}", ids::id_name(message.id), message.index, body)
}
