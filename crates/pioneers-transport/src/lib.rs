//! Byte transports for pioneers packets.
//!
//! Two kinds of plumbing live here:
//! - [`Channel`]: the non-blocking pipe between a producer process and the
//!   supervisor that spawned it
//! - [`RemoteLink`]: the packet link to the other node or the ground, with
//!   [`TcpLink`] and [`SerialLink`] implementations
//!
//! Nothing here blocks the caller except [`connect_within`], which exists for
//! command-line tools that want a connection up front.

pub mod channel;
pub mod error;
pub mod link;
pub mod serial;
pub mod tcp;

pub use channel::Channel;
pub use error::{Result, TransportError};
pub use link::{connect_within, RemoteLink, StreamLink};
pub use serial::{open_serial, SerialLink, DEFAULT_BAUD};
pub use tcp::{TcpLink, TcpRole};
