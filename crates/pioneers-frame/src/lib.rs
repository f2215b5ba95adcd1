//! Fixed-size telemetry packet framing.
//!
//! Every packet on the wire, whether it travels from a producer process to the
//! supervisor or between the two flight computers, is exactly 24 bytes:
//! - a zero sync byte and a zero end marker delimiting the frame
//! - a COBS overhead byte so that no other byte in the frame is zero
//! - an 8-bit id, a 16-bit little-endian index and a 16-byte payload
//! - a 16-bit little-endian CRC over id, index and payload
//!
//! Decoding a single frame never resynchronizes; [`PacketReader`] handles
//! recovery when frames arrive over an unaligned byte stream.

pub mod cobs;
pub mod codec;
pub mod command;
pub mod crc;
pub mod error;
pub mod ids;
pub mod reader;

pub use codec::{
    decode, encode, encode_into, payload_len, Message, Packet, PACKET_SIZE, PAYLOAD_SIZE,
};
pub use command::{ClearScope, Command};
pub use error::{ProtocolError, Result};
pub use ids::{IdClass, Node};
pub use reader::PacketReader;
