//! Video capture collaborator.
//!
//! Recording itself is an external program; the supervisor only starts it
//! at lift-off and stops it on termination.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use pioneers_producer::{Liveness, ManagedChild, ProcessError, ProducerConfig, StopPolicy};
use tracing::{info, warn};

pub trait Camera {
    fn start(&mut self) -> Result<(), ProcessError>;

    fn stop(&mut self) -> Result<(), ProcessError>;

    /// Poll without blocking.
    fn is_recording(&mut self) -> bool;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn start(&mut self) -> Result<(), ProcessError> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<(), ProcessError> {
        (**self).stop()
    }

    fn is_recording(&mut self) -> bool {
        (**self).is_recording()
    }
}

/// Used when no capture command is configured.
#[derive(Debug, Default)]
pub struct NoCamera;

impl Camera for NoCamera {
    fn start(&mut self) -> Result<(), ProcessError> {
        info!("no camera configured");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProcessError> {
        Ok(())
    }

    fn is_recording(&mut self) -> bool {
        false
    }
}

/// Runs a capture program as a child process.
#[derive(Debug)]
pub struct CommandCamera {
    argv: Vec<String>,
    video_dir: PathBuf,
    policy: StopPolicy,
    child: Option<ManagedChild>,
}

impl CommandCamera {
    pub fn new(argv: Vec<String>, video_dir: impl Into<PathBuf>, policy: StopPolicy) -> Self {
        Self {
            argv,
            video_dir: video_dir.into(),
            policy,
            child: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(ManagedChild::pid)
    }

    fn process_config(&self, stamp: u128) -> Result<ProducerConfig, ProcessError> {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| expand(arg, &self.video_dir, stamp))
            .collect();
        match argv.split_first() {
            Some((program, args)) => Ok(ProducerConfig::new("camera", program).args(args)),
            None => Err(ProcessError::SpawnFailed {
                name: "camera".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty camera command",
                ),
            }),
        }
    }
}

fn expand(arg: &str, video_dir: &Path, stamp: u128) -> String {
    arg.replace("{video_dir}", &video_dir.to_string_lossy())
        .replace("{stamp}", &stamp.to_string())
}

impl Camera for CommandCamera {
    fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_recording() {
            return Ok(());
        }
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let config = self.process_config(stamp)?;
        if let Err(err) = std::fs::create_dir_all(&self.video_dir) {
            warn!(dir = %self.video_dir.display(), error = %err, "cannot create video dir");
        }
        self.child = Some(ManagedChild::spawn(config, Stdio::null())?);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ProcessError> {
        match self.child.as_mut() {
            Some(child) => child.stop(&self.policy).map(|_| ()),
            None => Ok(()),
        }
    }

    fn is_recording(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| child.check_liveness() == Liveness::Running)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn policy() -> StopPolicy {
        StopPolicy {
            retries: 2,
            interval: Duration::from_millis(100),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn placeholders_are_expanded() {
        assert_eq!(
            expand("{video_dir}/video_{stamp}.h264", Path::new("/v"), 42),
            "/v/video_42.h264"
        );
    }

    #[test]
    fn start_and_stop_capture_process() {
        let dir = std::env::temp_dir().join(format!("pioneers-camera-{}", std::process::id()));
        let mut camera = CommandCamera::new(sh("exec sleep 30"), &dir, policy());
        assert!(!camera.is_recording());
        camera.start().unwrap();
        assert!(camera.is_recording());
        let pid = camera.pid();

        // Starting again keeps the same process.
        camera.start().unwrap();
        assert_eq!(camera.pid(), pid);

        camera.stop().unwrap();
        assert!(!camera.is_recording());
        assert!(dir.is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_program_fails_to_start() {
        let mut camera = CommandCamera::new(
            vec!["/nonexistent/raspivid".into()],
            std::env::temp_dir(),
            policy(),
        );
        assert!(matches!(
            camera.start(),
            Err(ProcessError::SpawnFailed { .. })
        ));
        assert!(!camera.is_recording());
    }

    #[test]
    fn empty_command_is_rejected() {
        let mut camera = CommandCamera::new(Vec::new(), std::env::temp_dir(), policy());
        assert!(camera.start().is_err());
    }
}
