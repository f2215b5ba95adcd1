use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use pioneers::config::{FlightConfig, LinkConfig};
use pioneers::supervisor::link_from_config;
use pioneers_frame::Node;
use pioneers_transport::{connect_within, RemoteLink, DEFAULT_BAUD};

use crate::exit::{config_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod monitor;
pub mod produce;
pub mod run;
pub mod selftest;
pub mod send;
pub mod version;

const CONNECT_WAIT: Duration = Duration::from_secs(5);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the flight supervisor.
    Run(RunArgs),
    /// Run one sensor producer (started by the supervisor).
    Produce(ProduceArgs),
    /// Run pre-flight checks and print the results.
    Selftest(SelftestArgs),
    /// Connect to a node and print the packets it sends.
    Monitor(MonitorArgs),
    /// Send a single command packet to a node.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args),
        Command::Produce(args) => produce::run(args),
        Command::Selftest(args) => selftest::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum NodeArg {
    A,
    B,
}

impl From<NodeArg> for Node {
    fn from(arg: NodeArg) -> Self {
        match arg {
            NodeArg::A => Node::A,
            NodeArg::B => Node::B,
        }
    }
}

/// Configuration file plus the overrides shared by `run` and `selftest`.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, short = 'c', value_name = "FILE", env = "PIONEERS_CONFIG")]
    pub config: Option<PathBuf>,
    /// Which flight computer this is.
    #[arg(long, env = "PIONEERS_NODE")]
    pub node: Option<NodeArg>,
    /// Root of the sysfs GPIO tree.
    #[arg(long, value_name = "DIR")]
    pub gpio_root: Option<PathBuf>,
    /// Directory for sensor backups.
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
    /// Listen for the peer on this address.
    #[arg(long, value_name = "ADDR", conflicts_with_all = ["tcp_client", "serial"])]
    pub tcp_server: Option<String>,
    /// Connect to the peer at this address.
    #[arg(long, value_name = "ADDR", conflicts_with_all = ["tcp_server", "serial"])]
    pub tcp_client: Option<String>,
    /// Reach the peer over this serial device.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["tcp_server", "tcp_client"])]
    pub serial: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the file (or defaults), apply overrides and validate.
    pub fn load(&self) -> CliResult<FlightConfig> {
        let mut config = match &self.config {
            Some(path) => FlightConfig::load(path).map_err(config_error)?,
            None => FlightConfig::default(),
        };
        if let Some(node) = self.node {
            config.node = node.into();
        }
        if let Some(root) = &self.gpio_root {
            config.pins.sysfs_root = root.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        if let Some(address) = &self.tcp_server {
            config.link = LinkConfig::TcpServer {
                address: address.clone(),
            };
        } else if let Some(address) = &self.tcp_client {
            config.link = LinkConfig::TcpClient {
                address: address.clone(),
            };
        } else if let Some(path) = &self.serial {
            config.link = LinkConfig::Serial {
                path: path.clone(),
                baud: DEFAULT_BAUD,
            };
        }
        config.validate().map_err(config_error)?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Fire the burn-wire at start of experiment (overrides file and strap).
    #[arg(long, value_name = "BOOL")]
    pub flight_mode: Option<bool>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
    Sim,
    I2c,
    Imp,
}

#[derive(Args, Debug)]
pub struct ProduceArgs {
    /// Producer name used in logs.
    #[arg(long)]
    pub name: String,
    /// Node whose measurement ids a simulated sensor uses.
    #[arg(long, default_value = "b")]
    pub node: NodeArg,
    /// Directory for the rotating backup files.
    #[arg(long, value_name = "DIR")]
    pub data_dir: PathBuf,
    /// Backup file name prefix. Defaults to the producer name.
    #[arg(long)]
    pub prefix: Option<String>,
    /// Sampling interval.
    #[arg(long, default_value_t = 100)]
    pub interval_ms: u64,
    /// Samples per backup file.
    #[arg(long, default_value_t = pioneers_producer::DEFAULT_ROTATE_EVERY)]
    pub rotate_every: u32,
    #[arg(long, default_value = "sim")]
    pub device: DeviceArg,
    /// Device path for i2c and imp sensors.
    #[arg(long, value_name = "PATH")]
    pub path: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Make a simulated sensor fail after this many samples.
    #[arg(long)]
    pub fail_after: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SelftestArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Node address (host:port) or serial device path.
    pub target: String,
    /// Wait for the node to connect instead of dialing it.
    #[arg(long)]
    pub listen: bool,
    /// Line rate when the target is a serial device.
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Exit after receiving N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Only print these packet classes (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub classes: Option<Vec<ClassArg>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ClassArg {
    Measurement,
    Status,
    Message,
    Command,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Node address (host:port) or serial device path.
    pub target: String,
    /// reboot, shutdown, flight-mode, self-test, clear or rebuild.
    pub command: String,
    /// on|off for flight-mode; all|data|video|logs for clear.
    pub arg: Option<String>,
    /// Packet index to stamp on the command.
    #[arg(long, default_value_t = 0)]
    pub index: u16,
    /// Print status packets received within this time (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub wait: Option<String>,
    /// Line rate when the target is a serial device.
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
}

/// Map a ground tool target onto the same link kinds a node is configured with.
/// Anything that looks like a path is a serial device.
pub fn target_link(target: &str, listen: bool, baud: u32) -> CliResult<LinkConfig> {
    if target.starts_with('/') || target.starts_with('.') {
        if listen {
            return Err(CliError::new(USAGE, "--listen only applies to tcp targets"));
        }
        return Ok(LinkConfig::Serial {
            path: PathBuf::from(target),
            baud,
        });
    }
    let address = target.to_string();
    Ok(if listen {
        LinkConfig::TcpServer { address }
    } else {
        LinkConfig::TcpClient { address }
    })
}

/// Build the link for `config` and bring it up. Dialed links get
/// [`CONNECT_WAIT`] to come up; a listening link is up once bound.
pub fn open_link(config: &LinkConfig) -> CliResult<Box<dyn RemoteLink>> {
    let mut link = link_from_config(config)
        .ok_or_else(|| CliError::new(USAGE, "no link to open"))?;
    let opened = match config {
        LinkConfig::TcpServer { .. } => link.connect(),
        _ => connect_within(link.as_mut(), CONNECT_WAIT),
    };
    opened.map_err(|err| transport_error("connect failed", err))?;
    Ok(link)
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_map_onto_link_kinds() {
        assert_eq!(
            target_link("10.0.0.2:5000", false, DEFAULT_BAUD).unwrap(),
            LinkConfig::TcpClient {
                address: "10.0.0.2:5000".into()
            }
        );
        assert_eq!(
            target_link("0.0.0.0:5000", true, DEFAULT_BAUD).unwrap(),
            LinkConfig::TcpServer {
                address: "0.0.0.0:5000".into()
            }
        );
        assert_eq!(
            target_link("/dev/ttyUSB0", false, 9600).unwrap(),
            LinkConfig::Serial {
                path: PathBuf::from("/dev/ttyUSB0"),
                baud: 9600
            }
        );
    }

    #[test]
    fn serial_targets_cannot_listen() {
        assert_eq!(
            target_link("/dev/ttyUSB0", true, DEFAULT_BAUD)
                .unwrap_err()
                .code,
            USAGE
        );
    }

    #[test]
    fn missing_serial_device_fails_to_open() {
        let config = target_link("/nonexistent/tty-ground", false, DEFAULT_BAUD).unwrap();
        let err = open_link(&config).err().expect("device does not exist");
        assert!(err.message.contains("/nonexistent/tty-ground"), "{}", err.message);
    }
}
