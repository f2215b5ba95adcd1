/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The packet id has no entry in the payload length table.
    #[error("invalid packet id 0x{0:02x}")]
    InvalidId(u8),

    /// The frame delimiters or the COBS offset chain are malformed.
    #[error("malformed frame (COBS chain does not end on the frame boundary)")]
    FrameError,

    /// The checksum carried by the frame does not match its contents.
    #[error("checksum mismatch (frame 0x{received:04x}, computed 0x{computed:04x})")]
    ChecksumError { received: u16, computed: u16 },

    /// A command packet carried an unknown command code.
    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// A command packet carried an argument the command does not accept.
    #[error("invalid argument {arg} for command code {code}")]
    InvalidArgument { code: u8, arg: u8 },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
