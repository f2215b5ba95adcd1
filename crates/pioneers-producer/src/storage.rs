use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::StorageError;

/// Samples per file before rolling over to the next one.
pub const DEFAULT_ROTATE_EVERY: u32 = 100;

/// Plain-text sample log that starts a new file every `rotate_every` rows.
///
/// Files are named `<prefix>_<stamp>_<sequence>.txt` where `stamp` is the
/// creation time in unix milliseconds, so a respawned producer never
/// overwrites the files of its predecessor. Each row holds the raw register
/// bytes in decimal followed by the elapsed-microseconds field.
#[derive(Debug)]
pub struct RotatingFile {
    dir: PathBuf,
    prefix: String,
    rotate_every: u32,
    stamp: u128,
    sequence: u32,
    rows: u32,
    current: Option<(PathBuf, LineWriter<File>)>,
}

impl RotatingFile {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rotate_every: u32,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::Create {
            path: dir.clone(),
            source: e,
        })?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Ok(Self {
            dir,
            prefix: prefix.into(),
            rotate_every: rotate_every.max(1),
            stamp,
            sequence: 0,
            rows: 0,
            current: None,
        })
    }

    /// Append one sample row, rolling over first if the current file is full.
    pub fn append(&mut self, registers: &[u8], elapsed_us: u32) -> Result<(), StorageError> {
        if self.current.is_none() || self.rows >= self.rotate_every {
            self.rotate()?;
        }
        let Some((path, writer)) = self.current.as_mut() else {
            return Ok(());
        };

        let mut row = String::with_capacity(registers.len() * 4 + 12);
        for byte in registers {
            row.push_str(&byte.to_string());
            row.push(',');
        }
        row.push_str(&elapsed_us.to_string());

        writeln!(writer, "{row}").map_err(|e| StorageError::Write {
            path: path.clone(),
            source: e,
        })?;
        self.rows += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), StorageError> {
        self.close()?;
        let path = self.dir.join(format!(
            "{}_{}_{:04}.txt",
            self.prefix, self.stamp, self.sequence
        ));
        let file = File::create(&path).map_err(|e| StorageError::Create {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), "opened new data file");
        self.sequence += 1;
        self.rows = 0;
        self.current = Some((path, LineWriter::new(file)));
        Ok(())
    }

    /// Flush and close the current file.
    pub fn close(&mut self) -> Result<(), StorageError> {
        if let Some((path, mut writer)) = self.current.take() {
            writer.flush().map_err(|e| StorageError::Write {
                path: path.clone(),
                source: e,
            })?;
            debug!(path = %path.display(), rows = self.rows, "closed data file");
        }
        Ok(())
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(path, _)| path.as_path())
    }

    /// Number of files opened so far.
    pub fn files_opened(&self) -> u32 {
        self.sequence
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let dir = std::env::temp_dir().join(format!(
            "pioneers-{label}-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sorted_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn rows_hold_decimal_registers_and_elapsed() {
        let dir = temp_dir("storage-row");
        let mut storage = RotatingFile::new(&dir, "imu", 10).unwrap();
        storage.append(&[0, 7, 255], 1234).unwrap();
        storage.close().unwrap();

        let files = sorted_files(&dir);
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(content, "0,7,255,1234\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rotates_every_n_rows() {
        let dir = temp_dir("storage-rotate");
        let mut storage = RotatingFile::new(&dir, "imp", 3).unwrap();
        for i in 0..7u32 {
            storage.append(&[i as u8], i).unwrap();
        }
        storage.close().unwrap();
        assert_eq!(storage.files_opened(), 3);

        let files = sorted_files(&dir);
        assert_eq!(files.len(), 3);
        let lines: Vec<usize> = files
            .iter()
            .map(|f| std::fs::read_to_string(f).unwrap().lines().count())
            .collect();
        assert_eq!(lines, vec![3, 3, 1]);

        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("imp_"));
        assert!(name.ends_with("_0000.txt"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_parent_is_created() {
        let root = temp_dir("storage-nested");
        let nested = root.join("data").join("pi1");
        let mut storage = RotatingFile::new(&nested, "imu", 5).unwrap();
        storage.append(&[1, 2], 3).unwrap();
        assert!(storage.current_path().unwrap().starts_with(&nested));
        let _ = std::fs::remove_dir_all(&root);
    }
}
