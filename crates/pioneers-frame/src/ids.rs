//! Packet id namespace.
//!
//! The top two bits of an id select its class. Measurement ids (class `00`)
//! are further keyed by their low six bits.

/// Measurement: accelerometer + gyroscope from node A.
pub const IMU_A_ACC_GYR: u8 = 0b0001_0000;

/// Measurement: magnetometer + elapsed time from node A.
pub const IMU_A_MAG_TIME: u8 = 0b0001_0001;

/// Measurement: accelerometer + gyroscope from node B.
pub const IMP_B_ACC_GYR: u8 = 0b0010_0000;

/// Measurement: magnetometer + time + ImP reading from node B.
pub const IMP_B_MAG_TIME: u8 = 0b0010_0010;

/// Status string from node A.
pub const STATUS_A: u8 = 0b0101_0000;

/// Status string from node B.
pub const STATUS_B: u8 = 0b0110_0000;

/// Free-text message from node A.
pub const MESSAGE_A: u8 = 0b1001_0000;

/// Free-text message from node B.
pub const MESSAGE_B: u8 = 0b1010_0000;

/// Operator command.
pub const COMMAND: u8 = 0b1100_0000;

const CLASS_MASK: u8 = 0b1100_0000;

/// The class an id belongs to, selected by its two top bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdClass {
    Measurement,
    Status,
    Message,
    Command,
}

impl IdClass {
    pub fn of(id: u8) -> Self {
        match id & CLASS_MASK {
            0b0000_0000 => IdClass::Measurement,
            0b0100_0000 => IdClass::Status,
            0b1000_0000 => IdClass::Message,
            _ => IdClass::Command,
        }
    }
}

/// Returns true if the id belongs to the command class.
pub fn is_command(id: u8) -> bool {
    IdClass::of(id) == IdClass::Command
}

/// Which of the two flight computers a packet originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Node {
    A,
    #[default]
    B,
}

impl Node {
    /// The two measurement ids this node's sensor producer emits per sample.
    pub fn measurement_ids(self) -> [u8; 2] {
        match self {
            Node::A => [IMU_A_ACC_GYR, IMU_A_MAG_TIME],
            Node::B => [IMP_B_ACC_GYR, IMP_B_MAG_TIME],
        }
    }

    pub fn status_id(self) -> u8 {
        match self {
            Node::A => STATUS_A,
            Node::B => STATUS_B,
        }
    }

    pub fn message_id(self) -> u8 {
        match self {
            Node::A => MESSAGE_A,
            Node::B => MESSAGE_B,
        }
    }
}

/// Returns a human-readable name for a packet id.
pub fn id_name(id: u8) -> &'static str {
    match id {
        IMU_A_ACC_GYR => "IMU_A_ACC_GYR",
        IMU_A_MAG_TIME => "IMU_A_MAG_TIME",
        IMP_B_ACC_GYR => "IMP_B_ACC_GYR",
        IMP_B_MAG_TIME => "IMP_B_MAG_TIME",
        STATUS_A => "STATUS_A",
        STATUS_B => "STATUS_B",
        MESSAGE_A => "MESSAGE_A",
        MESSAGE_B => "MESSAGE_B",
        _ => match IdClass::of(id) {
            IdClass::Measurement => "MEASUREMENT",
            IdClass::Status => "STATUS",
            IdClass::Message => "MESSAGE",
            IdClass::Command => "COMMAND",
        },
    }
}
