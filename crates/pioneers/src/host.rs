//! Operator host actions: reboot, shutdown, rebuild and file clearing.

use std::path::Path;
use std::process::Command;

use pioneers_frame::ClearScope;
use tracing::{info, warn};

use crate::config::{HostConfig, StorageConfig};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no {0} command configured")]
    NotConfigured(&'static str),

    #[error("failed to run {action} command: {source}")]
    Spawn {
        action: &'static str,
        source: std::io::Error,
    },

    #[error("{action} command failed with {status}")]
    Failed {
        action: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("failed to clear {path}: {source}")]
    Clear {
        path: String,
        source: std::io::Error,
    },
}

pub trait HostControl {
    fn reboot(&mut self) -> Result<(), HostError>;

    fn shutdown(&mut self) -> Result<(), HostError>;

    /// Rebuild the flight software; the caller restarts afterwards.
    fn rebuild(&mut self) -> Result<(), HostError>;
}

impl<H: HostControl + ?Sized> HostControl for Box<H> {
    fn reboot(&mut self) -> Result<(), HostError> {
        (**self).reboot()
    }

    fn shutdown(&mut self) -> Result<(), HostError> {
        (**self).shutdown()
    }

    fn rebuild(&mut self) -> Result<(), HostError> {
        (**self).rebuild()
    }
}

/// Runs the configured commands synchronously.
#[derive(Debug, Clone)]
pub struct ShellHost {
    config: HostConfig,
}

impl ShellHost {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

fn run(action: &'static str, argv: &[String]) -> Result<(), HostError> {
    let (program, args) = argv.split_first().ok_or(HostError::NotConfigured(action))?;
    info!(action, program = %program, "running host command");
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| HostError::Spawn { action, source })?;
    if status.success() {
        Ok(())
    } else {
        Err(HostError::Failed { action, status })
    }
}

impl HostControl for ShellHost {
    fn reboot(&mut self) -> Result<(), HostError> {
        run("reboot", &self.config.reboot)
    }

    fn shutdown(&mut self) -> Result<(), HostError> {
        run("shutdown", &self.config.shutdown)
    }

    fn rebuild(&mut self) -> Result<(), HostError> {
        match &self.config.rebuild {
            Some(argv) => run("rebuild", argv),
            None => Err(HostError::NotConfigured("rebuild")),
        }
    }
}

/// Remove the contents (not the directories themselves) of the stores in
/// `scope`, sparing the paths in `keep`. Returns how many entries were removed.
pub fn clear_files(
    storage: &StorageConfig,
    scope: ClearScope,
    keep: &[&Path],
) -> Result<usize, HostError> {
    let dirs: Vec<&Path> = match scope {
        ClearScope::All => storage.dirs().iter().map(|(_, dir)| *dir).collect(),
        ClearScope::Data => vec![storage.data_dir.as_path()],
        ClearScope::Video => vec![storage.video_dir.as_path()],
        ClearScope::Logs => vec![storage.log_dir.as_path()],
    };

    let mut removed = 0;
    for dir in dirs {
        let clear_err = |source| HostError::Clear {
            path: dir.display().to_string(),
            source,
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(clear_err(err)),
        };
        for entry in entries {
            let path = entry.map_err(clear_err)?.path();
            if keep.contains(&path.as_path()) {
                continue;
            }
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove"),
            }
        }
    }
    info!(?scope, removed, "files cleared");
    Ok(removed)
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records which host actions were requested.
    #[derive(Debug, Clone, Default)]
    pub struct MockHost {
        pub calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl HostControl for MockHost {
        fn reboot(&mut self) -> Result<(), HostError> {
            self.calls.borrow_mut().push("reboot");
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), HostError> {
            self.calls.borrow_mut().push("shutdown");
            Ok(())
        }

        fn rebuild(&mut self) -> Result<(), HostError> {
            self.calls.borrow_mut().push("rebuild");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    fn temp_storage(label: &str) -> (PathBuf, StorageConfig) {
        let root = std::env::temp_dir().join(format!(
            "pioneers-host-{label}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let storage = StorageConfig {
            data_dir: root.join("data"),
            video_dir: root.join("video"),
            log_dir: root.join("logs"),
        };
        for (_, dir) in storage.dirs() {
            std::fs::create_dir_all(dir).unwrap();
            std::fs::write(dir.join("a.txt"), "x").unwrap();
            std::fs::write(dir.join("b.txt"), "y").unwrap();
        }
        (root, storage)
    }

    #[test]
    fn commands_report_exit_status() {
        let mut host = ShellHost::new(HostConfig {
            reboot: sh("exit 0"),
            shutdown: sh("exit 3"),
            rebuild: None,
        });
        assert!(host.reboot().is_ok());
        assert!(matches!(
            host.shutdown(),
            Err(HostError::Failed { action: "shutdown", .. })
        ));
        assert!(matches!(
            host.rebuild(),
            Err(HostError::NotConfigured("rebuild"))
        ));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut host = ShellHost::new(HostConfig {
            reboot: vec!["/nonexistent/reboot".into()],
            ..HostConfig::default()
        });
        assert!(matches!(host.reboot(), Err(HostError::Spawn { .. })));
    }

    #[test]
    fn clear_data_leaves_other_stores() {
        let (root, storage) = temp_storage("data");
        assert_eq!(clear_files(&storage, ClearScope::Data, &[]).unwrap(), 2);
        assert_eq!(std::fs::read_dir(&storage.data_dir).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&storage.video_dir).unwrap().count(), 2);
        assert!(storage.data_dir.is_dir());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn clear_spares_kept_files() {
        let (root, storage) = temp_storage("keep");
        let kept = storage.data_dir.join("a.txt");
        assert_eq!(
            clear_files(&storage, ClearScope::Data, &[kept.as_path()]).unwrap(),
            1
        );
        assert!(kept.exists());
        assert!(!storage.data_dir.join("b.txt").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn clear_all_empties_every_store() {
        let (root, storage) = temp_storage("all");
        std::fs::remove_dir_all(&storage.log_dir).unwrap();
        assert_eq!(clear_files(&storage, ClearScope::All, &[]).unwrap(), 4);
        let _ = std::fs::remove_dir_all(&root);
    }
}
