//! Flight supervisor for the PIOneERS experiment computers.
//!
//! One [`Supervisor`](supervisor::Supervisor) per node follows the launch
//! vehicle's event lines through the mission phases, starts and restarts the
//! sensor producers, forwards their packets to the other node and executes
//! operator commands.
//!
//! # Crate Structure
//!
//! - [`state`]: mission phases and the actions each transition triggers
//! - [`supervisor`]: the single-threaded loop that owns everything
//! - [`gpio`], [`burnwire`], [`clock`]: hardware and time
//! - [`camera`], [`host`], [`peerlog`]: collaborators driven by transitions
//!   and commands
//! - [`config`], [`selftest`], [`status`]: configuration, pre-flight checks
//!   and status reporting
//!
//! The wire format lives in [`frame`], the pipes and links in [`transport`]
//! and the producer processes in [`producer`].

pub mod burnwire;
pub mod camera;
pub mod clock;
pub mod config;
pub mod gpio;
pub mod host;
pub mod peerlog;
pub mod selftest;
pub mod state;
pub mod status;
pub mod supervisor;

/// Re-export frame types.
pub mod frame {
    pub use pioneers_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use pioneers_transport::*;
}

/// Re-export producer types.
pub mod producer {
    pub use pioneers_producer::*;
}

pub use config::{ConfigError, FlightConfig};
pub use state::{Mission, MissionState};
pub use supervisor::{Hardware, RunOutcome, Supervisor};
