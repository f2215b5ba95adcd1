//! Flight configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration for a bench run.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pioneers_frame::Node;
use pioneers_producer::{ProducerConfig, StopPolicy, DEFAULT_ROTATE_EVERY};
use pioneers_transport::DEFAULT_BAUD;
use serde::{Deserialize, Serialize};

use crate::gpio::Debounce;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlightConfig {
    pub node: Node,
    /// Fire the burn-wire on entering the experiment phase.
    pub flight_mode: bool,
    pub pins: PinConfig,
    pub timing: TimingConfig,
    pub link: LinkConfig,
    /// Empty means the node's default producer set.
    pub producers: Vec<ProducerSpec>,
    pub camera: CameraConfig,
    pub host: HostConfig,
    pub storage: StorageConfig,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            node: Node::default(),
            flight_mode: false,
            pins: PinConfig::default(),
            timing: TimingConfig::default(),
            link: LinkConfig::default(),
            producers: Vec::new(),
            camera: CameraConfig::default(),
            host: HostConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// BCM pin numbers and the sysfs tree they live under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinConfig {
    pub sysfs_root: PathBuf,
    pub lift_off: u32,
    pub start_of_experiment: u32,
    pub start_of_data_storage: u32,
    pub burn_wire: u32,
    /// Read once at start-up; pulled low enables flight mode.
    pub flight_mode_strap: Option<u32>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            lift_off: 21,
            start_of_experiment: 20,
            start_of_data_storage: 16,
            burn_wire: 23,
            flight_mode_strap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub supervision_ms: u64,
    pub heartbeat_ms: u64,
    pub reconnect_ms: u64,
    pub burn_ms: u64,
    pub stop_retries: u32,
    pub stop_interval_ms: u64,
    pub debounce_samples: u32,
    pub debounce_spacing_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            supervision_ms: 3_000,
            heartbeat_ms: 1_000,
            reconnect_ms: 5_000,
            burn_ms: 10_000,
            stop_retries: 5,
            stop_interval_ms: 1_000,
            debounce_samples: 5,
            debounce_spacing_us: 200,
        }
    }
}

impl TimingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn supervision(&self) -> Duration {
        Duration::from_millis(self.supervision_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn burn(&self) -> Duration {
        Duration::from_millis(self.burn_ms)
    }

    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            retries: self.stop_retries,
            interval: Duration::from_millis(self.stop_interval_ms),
        }
    }

    pub fn debounce(&self) -> Debounce {
        Debounce {
            samples: self.debounce_samples,
            spacing: Duration::from_micros(self.debounce_spacing_us),
        }
    }
}

/// How this node reaches the other one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum LinkConfig {
    #[default]
    None,
    TcpServer {
        address: String,
    },
    TcpClient {
        address: String,
    },
    Serial {
        path: PathBuf,
        #[serde(default = "default_baud")]
        baud: u32,
    },
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

/// Where a producer gets its samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum DeviceSpec {
    Sim {
        #[serde(default)]
        fail_after: Option<u64>,
    },
    I2c {
        bus: PathBuf,
    },
    Imp {
        path: PathBuf,
        #[serde(default = "default_baud")]
        baud: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProducerSpec {
    pub name: String,
    pub device: DeviceSpec,
    /// Sample file prefix; defaults to the producer name.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_rotate_every")]
    pub rotate_every: u32,
    /// Run this argv instead of the built-in worker.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_interval_ms() -> u64 {
    100
}

fn default_rotate_every() -> u32 {
    DEFAULT_ROTATE_EVERY
}

impl ProducerSpec {
    pub fn new(name: impl Into<String>, device: DeviceSpec) -> Self {
        Self {
            name: name.into(),
            device,
            prefix: None,
            interval_ms: default_interval_ms(),
            rotate_every: default_rotate_every(),
            command: None,
        }
    }

    /// The producer each node flies with.
    pub fn node_default(node: Node) -> Self {
        match node {
            Node::A => Self::new(
                "imu",
                DeviceSpec::I2c {
                    bus: PathBuf::from("/dev/i2c-1"),
                },
            ),
            Node::B => Self::new(
                "imp",
                DeviceSpec::Imp {
                    path: PathBuf::from("/dev/serial0"),
                    baud: DEFAULT_BAUD,
                },
            ),
        }
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.name)
    }

    /// Argv for `exe produce ...` that runs this producer's worker.
    pub fn worker_args(&self, node: Node, data_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "produce".into(),
            "--name".into(),
            self.name.clone().into(),
            "--node".into(),
            node_arg(node).into(),
            "--data-dir".into(),
            data_dir.as_os_str().to_owned(),
            "--prefix".into(),
            self.prefix().into(),
            "--interval-ms".into(),
            self.interval_ms.to_string().into(),
            "--rotate-every".into(),
            self.rotate_every.to_string().into(),
        ];
        match &self.device {
            DeviceSpec::Sim { fail_after } => {
                args.extend(["--device".into(), "sim".into()]);
                if let Some(n) = fail_after {
                    args.extend(["--fail-after".into(), n.to_string().into()]);
                }
            }
            DeviceSpec::I2c { bus } => {
                args.extend([
                    "--device".into(),
                    "i2c".into(),
                    "--path".into(),
                    bus.as_os_str().to_owned(),
                ]);
            }
            DeviceSpec::Imp { path, baud } => {
                args.extend([
                    "--device".into(),
                    "imp".into(),
                    "--path".into(),
                    path.as_os_str().to_owned(),
                    "--baud".into(),
                    baud.to_string().into(),
                ]);
            }
        }
        args
    }

    /// How to launch this producer. `exe` is the binary providing the
    /// `produce` subcommand; an explicit `command` takes precedence.
    pub fn process_config(&self, exe: &Path, node: Node, data_dir: &Path) -> ProducerConfig {
        match self.command.as_deref() {
            Some([program, rest @ ..]) => {
                ProducerConfig::new(self.name.clone(), program).args(rest.iter().cloned())
            }
            _ => ProducerConfig::new(self.name.clone(), exe).args(self.worker_args(node, data_dir)),
        }
    }
}

pub fn node_arg(node: Node) -> &'static str {
    match node {
        Node::A => "a",
        Node::B => "b",
    }
}

/// Video capture command. `{video_dir}` and `{stamp}` are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub command: Option<Vec<String>>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: Some(
                [
                    "raspivid",
                    "-t",
                    "0",
                    "-o",
                    "{video_dir}/video_{stamp}.h264",
                ]
                .map(String::from)
                .to_vec(),
            ),
        }
    }
}

/// Shell commands for operator host actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub reboot: Vec<String>,
    pub shutdown: Vec<String>,
    /// Rebuild the flight software before restarting; none disables it.
    pub rebuild: Option<Vec<String>>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            reboot: ["sudo", "reboot"].map(String::from).to_vec(),
            shutdown: ["sudo", "shutdown", "-h", "now"].map(String::from).to_vec(),
            rebuild: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub video_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Docs/Data"),
            video_dir: PathBuf::from("Docs/Video"),
            log_dir: PathBuf::from("Docs/Logs"),
        }
    }
}

impl StorageConfig {
    pub fn dirs(&self) -> [(&'static str, &Path); 3] {
        [
            ("data", self.data_dir.as_path()),
            ("video", self.video_dir.as_path()),
            ("logs", self.log_dir.as_path()),
        ]
    }
}

impl FlightConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Producers to run: the configured list, or the node's default.
    pub fn producers(&self) -> Vec<ProducerSpec> {
        if self.producers.is_empty() {
            vec![ProducerSpec::node_default(self.node)]
        } else {
            self.producers.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        let positive = [
            ("tick_ms", t.tick_ms),
            ("supervision_ms", t.supervision_ms),
            ("heartbeat_ms", t.heartbeat_ms),
            ("reconnect_ms", t.reconnect_ms),
            ("burn_ms", t.burn_ms),
            ("stop_interval_ms", t.stop_interval_ms),
            ("debounce_samples", u64::from(t.debounce_samples)),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!(
                "timing.{field} must be positive"
            )));
        }

        let p = &self.pins;
        let mut pins = vec![
            p.lift_off,
            p.start_of_experiment,
            p.start_of_data_storage,
            p.burn_wire,
        ];
        pins.extend(p.flight_mode_strap);
        let mut sorted = pins.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != pins.len() {
            return Err(ConfigError::Invalid(format!("pins overlap: {pins:?}")));
        }

        let mut names: Vec<&str> = self.producers.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid("producer names must be unique".into()));
        }
        for producer in &self.producers {
            if producer.name.is_empty() {
                return Err(ConfigError::Invalid("producer name cannot be empty".into()));
            }
            if producer.rotate_every == 0 {
                return Err(ConfigError::Invalid(format!(
                    "producer '{}': rotate_every must be positive",
                    producer.name
                )));
            }
            if matches!(producer.command.as_deref(), Some([])) {
                return Err(ConfigError::Invalid(format!(
                    "producer '{}': command cannot be empty",
                    producer.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> FlightConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn empty_object_is_all_defaults() {
        let config = parse("{}");
        assert_eq!(config, FlightConfig::default());
        assert_eq!(config.timing.burn(), Duration::from_millis(10_000));
        assert_eq!(config.timing.stop_policy(), StopPolicy::default());
        assert_eq!(config.timing.debounce(), Debounce::default());
        assert_eq!(config.pins.lift_off, 21);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(r#"{"node": "a", "flight_mode": true, "timing": {"burn_ms": 500}}"#);
        assert_eq!(config.node, Node::A);
        assert!(config.flight_mode);
        assert_eq!(config.timing.burn_ms, 500);
        assert_eq!(config.timing.tick_ms, 10);
    }

    #[test]
    fn link_variants_parse() {
        let config = parse(r#"{"link": {"kind": "tcp-client", "address": "10.0.0.1:31415"}}"#);
        assert_eq!(
            config.link,
            LinkConfig::TcpClient {
                address: "10.0.0.1:31415".into()
            }
        );
        let config = parse(r#"{"link": {"kind": "serial", "path": "/dev/ttyUSB0"}}"#);
        assert_eq!(
            config.link,
            LinkConfig::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 230_400
            }
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<FlightConfig>(r#"{"nodes": "a"}"#).is_err());
    }

    #[test]
    fn mistyped_link_and_device_keys_are_rejected() {
        let link = r#"{"link": {"kind": "serial", "path": "/dev/ttyUSB0", "buad": 9600}}"#;
        assert!(serde_json::from_str::<FlightConfig>(link).is_err());
        let device = r#"{"producers": [{"name": "imu", "device": {"kind": "sim", "fail_afte": 3}}]}"#;
        assert!(serde_json::from_str::<FlightConfig>(device).is_err());
    }

    #[test]
    fn default_producer_follows_node() {
        let mut config = FlightConfig::default();
        config.node = Node::A;
        let producers = config.producers();
        assert_eq!(producers.len(), 1);
        assert!(matches!(producers[0].device, DeviceSpec::I2c { .. }));

        config.node = Node::B;
        assert!(matches!(config.producers()[0].device, DeviceSpec::Imp { .. }));
    }

    #[test]
    fn worker_args_describe_the_device() {
        let spec = ProducerSpec {
            prefix: Some("imu_a".into()),
            ..ProducerSpec::new("imu", DeviceSpec::Sim { fail_after: Some(3) })
        };
        let config = spec.process_config(Path::new("/usr/bin/pioneers"), Node::A, Path::new("/data"));
        assert_eq!(config.program, PathBuf::from("/usr/bin/pioneers"));
        let args: Vec<String> = config
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "produce");
        let joined = args.join(" ");
        assert!(joined.contains("--node a"));
        assert!(joined.contains("--prefix imu_a"));
        assert!(joined.contains("--device sim --fail-after 3"));
    }

    #[test]
    fn explicit_command_overrides_worker() {
        let spec = ProducerSpec {
            command: Some(vec!["/bin/sh".into(), "-c".into(), "exit 1".into()]),
            ..ProducerSpec::new("custom", DeviceSpec::Sim { fail_after: None })
        };
        let config = spec.process_config(Path::new("/unused"), Node::B, Path::new("/data"));
        assert_eq!(config.program, PathBuf::from("/bin/sh"));
        assert_eq!(config.args.len(), 2);
    }

    #[test]
    fn validation_catches_mistakes() {
        let mut config = FlightConfig::default();
        config.pins.burn_wire = config.pins.lift_off;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = FlightConfig::default();
        let sim = ProducerSpec::new("dup", DeviceSpec::Sim { fail_after: None });
        config.producers = vec![sim.clone(), sim];
        assert!(config.validate().is_err());

        let mut config = FlightConfig::default();
        config.timing.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn every_period_must_be_positive() {
        let zeroed: [(&str, fn(&mut TimingConfig)); 7] = [
            ("tick_ms", |t: &mut TimingConfig| t.tick_ms = 0),
            ("supervision_ms", |t: &mut TimingConfig| t.supervision_ms = 0),
            ("heartbeat_ms", |t: &mut TimingConfig| t.heartbeat_ms = 0),
            ("reconnect_ms", |t: &mut TimingConfig| t.reconnect_ms = 0),
            ("burn_ms", |t: &mut TimingConfig| t.burn_ms = 0),
            ("stop_interval_ms", |t: &mut TimingConfig| t.stop_interval_ms = 0),
            ("debounce_samples", |t: &mut TimingConfig| t.debounce_samples = 0),
        ];
        for (field, zero) in zeroed {
            let mut config = FlightConfig::default();
            zero(&mut config.timing);
            match config.validate() {
                Err(ConfigError::Invalid(message)) => {
                    assert!(message.contains(field), "{field}: {message}")
                }
                other => panic!("{field}: expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let missing = Path::new("/nonexistent/pioneers.json");
        assert!(matches!(
            FlightConfig::load(missing),
            Err(ConfigError::Read { .. })
        ));

        let path = std::env::temp_dir().join(format!("pioneers-config-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FlightConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        std::fs::write(&path, r#"{"flight_mode": true}"#).unwrap();
        assert!(FlightConfig::load(&path).unwrap().flight_mode);
        let _ = std::fs::remove_file(&path);
    }
}
