//! Operator command packets.
//!
//! Commands travel in the command id class with `payload[0]` holding the
//! command code and `payload[1]` its argument.

use crate::codec::{Message, PAYLOAD_SIZE};
use crate::error::{ProtocolError, Result};
use crate::ids;

pub const CODE_REBOOT: u8 = 1;
pub const CODE_SHUTDOWN: u8 = 2;
pub const CODE_FLIGHT_MODE: u8 = 3;
pub const CODE_SELF_TEST: u8 = 4;
pub const CODE_CLEAR_FILES: u8 = 5;
pub const CODE_REBUILD: u8 = 6;

/// Which stored files a clear command removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Data,
    Video,
    Logs,
}

impl ClearScope {
    pub fn from_arg(arg: u8) -> Option<Self> {
        match arg {
            0 => Some(ClearScope::All),
            1 => Some(ClearScope::Data),
            2 => Some(ClearScope::Video),
            3 => Some(ClearScope::Logs),
            _ => None,
        }
    }

    pub fn as_arg(self) -> u8 {
        match self {
            ClearScope::All => 0,
            ClearScope::Data => 1,
            ClearScope::Video => 2,
            ClearScope::Logs => 3,
        }
    }
}

impl std::str::FromStr for ClearScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ClearScope::All),
            "data" => Ok(ClearScope::Data),
            "video" => Ok(ClearScope::Video),
            "logs" => Ok(ClearScope::Logs),
            other => Err(format!("unknown clear scope '{other}'")),
        }
    }
}

/// A command sent by the ground segment (or the other node).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reboot,
    Shutdown,
    SetFlightMode(bool),
    SelfTest,
    ClearFiles(ClearScope),
    RebuildAndRestart,
}

impl Command {
    /// Interpret a decoded message as a command.
    ///
    /// The caller is expected to have checked the id class.
    pub fn parse(message: &Message) -> Result<Self> {
        if !ids::is_command(message.id) {
            return Err(ProtocolError::InvalidId(message.id));
        }
        let code = message.payload[0];
        let arg = message.payload[1];
        match code {
            CODE_REBOOT => Ok(Command::Reboot),
            CODE_SHUTDOWN => Ok(Command::Shutdown),
            CODE_FLIGHT_MODE => Ok(Command::SetFlightMode(arg != 0)),
            CODE_SELF_TEST => Ok(Command::SelfTest),
            CODE_CLEAR_FILES => ClearScope::from_arg(arg)
                .map(Command::ClearFiles)
                .ok_or(ProtocolError::InvalidArgument { code, arg }),
            CODE_REBUILD => Ok(Command::RebuildAndRestart),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Command::Reboot => CODE_REBOOT,
            Command::Shutdown => CODE_SHUTDOWN,
            Command::SetFlightMode(_) => CODE_FLIGHT_MODE,
            Command::SelfTest => CODE_SELF_TEST,
            Command::ClearFiles(_) => CODE_CLEAR_FILES,
            Command::RebuildAndRestart => CODE_REBUILD,
        }
    }

    pub fn arg(self) -> u8 {
        match self {
            Command::SetFlightMode(on) => u8::from(on),
            Command::ClearFiles(scope) => scope.as_arg(),
            _ => 0,
        }
    }

    /// Build the message carrying this command.
    pub fn to_message(self, index: u16) -> Message {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[0] = self.code();
        payload[1] = self.arg();
        Message {
            id: ids::COMMAND,
            index,
            payload,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Reboot => write!(f, "reboot"),
            Command::Shutdown => write!(f, "shutdown"),
            Command::SetFlightMode(on) => write!(f, "flight-mode {}", if *on { "on" } else { "off" }),
            Command::SelfTest => write!(f, "self-test"),
            Command::ClearFiles(scope) => write!(f, "clear {scope:?}"),
            Command::RebuildAndRestart => write!(f, "rebuild"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn command_message(code: u8, arg: u8) -> Message {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[0] = code;
        payload[1] = arg;
        Message {
            id: ids::COMMAND,
            index: 0,
            payload,
        }
    }

    #[test]
    fn parses_every_command_code() {
        assert_eq!(Command::parse(&command_message(1, 0)), Ok(Command::Reboot));
        assert_eq!(Command::parse(&command_message(2, 0)), Ok(Command::Shutdown));
        assert_eq!(
            Command::parse(&command_message(3, 1)),
            Ok(Command::SetFlightMode(true))
        );
        assert_eq!(
            Command::parse(&command_message(3, 0)),
            Ok(Command::SetFlightMode(false))
        );
        assert_eq!(Command::parse(&command_message(4, 0)), Ok(Command::SelfTest));
        assert_eq!(
            Command::parse(&command_message(5, 2)),
            Ok(Command::ClearFiles(ClearScope::Video))
        );
        assert_eq!(
            Command::parse(&command_message(6, 0)),
            Ok(Command::RebuildAndRestart)
        );
    }

    #[test]
    fn rejects_unknown_code_and_scope() {
        assert_eq!(
            Command::parse(&command_message(9, 0)),
            Err(ProtocolError::UnknownCommand(9))
        );
        assert_eq!(
            Command::parse(&command_message(5, 7)),
            Err(ProtocolError::InvalidArgument { code: 5, arg: 7 })
        );
    }

    #[test]
    fn rejects_non_command_id() {
        let mut message = command_message(1, 0);
        message.id = ids::STATUS_A;
        assert_eq!(
            Command::parse(&message),
            Err(ProtocolError::InvalidId(ids::STATUS_A))
        );
    }

    #[test]
    fn command_survives_the_wire() {
        let command = Command::ClearFiles(ClearScope::Logs);
        let message = command.to_message(77);
        let packet = encode(message.id, message.index, &message.payload).unwrap();
        let decoded = decode(&packet).unwrap();
        assert_eq!(Command::parse(&decoded), Ok(command));
        assert_eq!(decoded.index, 77);
    }

    #[test]
    fn scope_from_str() {
        assert_eq!("DATA".parse::<ClearScope>(), Ok(ClearScope::Data));
        assert!("everything".parse::<ClearScope>().is_err());
    }
}
