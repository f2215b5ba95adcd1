use crate::cobs;
use crate::crc::crc16;
use crate::error::{ProtocolError, Result};
use crate::ids::{self, IdClass};

/// Total wire size of a packet.
pub const PACKET_SIZE: usize = 24;

/// Size of the (zero-padded) payload field.
pub const PAYLOAD_SIZE: usize = 16;

const ID_POS: usize = 2;
const INDEX_POS: usize = 3;
const PAYLOAD_POS: usize = 5;
const CHECKSUM_POS: usize = PAYLOAD_POS + PAYLOAD_SIZE;

/// Bytes covered by the checksum: id + index + payload.
const CHECKSUMMED: std::ops::Range<usize> = ID_POS..CHECKSUM_POS;

/// A COBS-stuffed 24-byte frame as it appears on the wire.
///
/// ```text
/// ┌──────┬─────┬────┬───────────┬──────────────┬────────────┬─────┐
/// │ sync │ OHB │ id │ index (LE)│ payload (16) │ CRC16 (LE) │ end │
/// │  0   │     │    │    2B     │              │     2B     │  0  │
/// └──────┴─────┴────┴───────────┴──────────────┴────────────┴─────┘
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Packet([u8; PACKET_SIZE]);

impl Packet {
    /// An all-zero frame, used as a scratch destination for [`encode_into`].
    pub const fn zeroed() -> Self {
        Self([0; PACKET_SIZE])
    }

    /// Wrap raw wire bytes. No validation happens until [`decode`].
    pub const fn from_bytes(bytes: [u8; PACKET_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; PACKET_SIZE] {
        self.0
    }

    /// The raw (still stuffed) checksum field.
    pub fn checksum_field(&self) -> [u8; 2] {
        [self.0[CHECKSUM_POS], self.0[CHECKSUM_POS + 1]]
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Packet(")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The decoded contents of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub id: u8,
    pub index: u16,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Message {
    /// The meaningful part of the payload for this message's id.
    ///
    /// Falls back to the full payload for ids outside the length table.
    pub fn data(&self) -> &[u8] {
        let len = payload_len(self.id).unwrap_or(PAYLOAD_SIZE);
        &self.payload[..len]
    }

    /// Payload interpreted as a zero-terminated ASCII string (status and
    /// message packets).
    pub fn text(&self) -> String {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PAYLOAD_SIZE);
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }

    pub fn encode(&self) -> Result<Packet> {
        encode(self.id, self.index, &self.payload)
    }
}

/// Number of meaningful payload bytes for `id`, or `None` if the id is not
/// mapped.
pub fn payload_len(id: u8) -> Option<usize> {
    match IdClass::of(id) {
        IdClass::Status | IdClass::Message | IdClass::Command => Some(PAYLOAD_SIZE),
        IdClass::Measurement => match id & 0b0011_1111 {
            ids::IMU_A_ACC_GYR | ids::IMP_B_ACC_GYR | ids::IMP_B_MAG_TIME => Some(12),
            ids::IMU_A_MAG_TIME => Some(10),
            _ => None,
        },
    }
}

/// Encode a packet.
///
/// Only the first `payload_len(id)` bytes of `payload` are used; the rest of
/// the 16-byte payload field is zero-padded.
pub fn encode(id: u8, index: u16, payload: &[u8]) -> Result<Packet> {
    let mut packet = Packet::zeroed();
    encode_into(&mut packet, id, index, payload)?;
    Ok(packet)
}

/// Encode a packet into an existing frame.
///
/// Returns [`ProtocolError::InvalidId`] without touching `dst` if the id is
/// not mapped.
pub fn encode_into(dst: &mut Packet, id: u8, index: u16, payload: &[u8]) -> Result<()> {
    let len = payload_len(id).ok_or(ProtocolError::InvalidId(id))?;
    let copied = len.min(payload.len());

    let frame = &mut dst.0;
    frame[ID_POS] = id;
    frame[INDEX_POS..PAYLOAD_POS].copy_from_slice(&index.to_le_bytes());
    frame[PAYLOAD_POS..PAYLOAD_POS + copied].copy_from_slice(&payload[..copied]);
    frame[PAYLOAD_POS + copied..CHECKSUM_POS].fill(0);

    let checksum = crc16(&frame[CHECKSUMMED]);
    frame[CHECKSUM_POS..CHECKSUM_POS + 2].copy_from_slice(&checksum.to_le_bytes());

    cobs::stuff(frame);
    Ok(())
}

/// Decode a frame-aligned packet.
///
/// Total over arbitrary input: malformed frames yield
/// [`ProtocolError::FrameError`], corrupted contents yield
/// [`ProtocolError::ChecksumError`].
pub fn decode(packet: &Packet) -> Result<Message> {
    let mut frame = packet.0;
    cobs::unstuff(&mut frame)?;

    let received = u16::from_le_bytes([frame[CHECKSUM_POS], frame[CHECKSUM_POS + 1]]);
    let computed = crc16(&frame[CHECKSUMMED]);
    if received != computed {
        return Err(ProtocolError::ChecksumError { received, computed });
    }

    let mut payload = [0u8; PAYLOAD_SIZE];
    payload.copy_from_slice(&frame[PAYLOAD_POS..CHECKSUM_POS]);

    Ok(Message {
        id: frame[ID_POS],
        index: u16::from_le_bytes([frame[INDEX_POS], frame[INDEX_POS + 1]]),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::*;

    const SUPPORTED: [u8; 9] = [
        IMU_A_ACC_GYR,
        IMU_A_MAG_TIME,
        IMP_B_ACC_GYR,
        IMP_B_MAG_TIME,
        STATUS_A,
        STATUS_B,
        MESSAGE_A,
        MESSAGE_B,
        COMMAND,
    ];

    fn sample_payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    /// Positions of COBS code bytes in a well-formed frame.
    fn code_positions(packet: &Packet) -> Vec<usize> {
        let frame = packet.as_bytes();
        let mut positions = Vec::new();
        let mut pos = cobs::OVERHEAD_POS;
        while pos < cobs::END_POS {
            positions.push(pos);
            pos += frame[pos] as usize;
        }
        positions
    }

    #[test]
    fn test_roundtrip_every_supported_id() {
        for (n, &id) in SUPPORTED.iter().enumerate() {
            let len = payload_len(id).unwrap();
            let data = sample_payload(len, n as u8);
            let index = 0x0100 + n as u16;

            let packet = encode(id, index, &data).unwrap();
            let message = decode(&packet).unwrap();

            assert_eq!(message.id, id);
            assert_eq!(message.index, index);
            assert_eq!(message.data(), data.as_slice());
            assert!(message.payload[len..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_measurement_lengths() {
        assert_eq!(payload_len(IMU_A_ACC_GYR), Some(12));
        assert_eq!(payload_len(IMU_A_MAG_TIME), Some(10));
        assert_eq!(payload_len(IMP_B_ACC_GYR), Some(12));
        assert_eq!(payload_len(IMP_B_MAG_TIME), Some(12));
        assert_eq!(payload_len(STATUS_A), Some(16));
        assert_eq!(payload_len(0xC3), Some(16));
        assert_eq!(payload_len(0x00), None);
        assert_eq!(payload_len(0x21), None);
        assert_eq!(payload_len(0x3F), None);
    }

    #[test]
    fn test_payload_truncated_to_mapped_length() {
        let long = [0xAA; 16];
        let packet = encode(IMU_A_MAG_TIME, 7, &long).unwrap();
        let message = decode(&packet).unwrap();
        assert_eq!(message.data(), &[0xAA; 10]);
        assert_eq!(&message.payload[10..], &[0u8; 6]);
    }

    #[test]
    fn test_short_payload_zero_padded() {
        let packet = encode(STATUS_B, 1, b"ok").unwrap();
        let message = decode(&packet).unwrap();
        assert_eq!(&message.payload[..2], b"ok");
        assert!(message.payload[2..].iter().all(|&b| b == 0));
        assert_eq!(message.text(), "ok");
    }

    #[test]
    fn test_index_wraps_and_roundtrips() {
        for index in [0u16, 1, 0x00FF, 0xFF00, u16::MAX] {
            let packet = encode(IMP_B_ACC_GYR, index, &[1; 12]).unwrap();
            assert_eq!(decode(&packet).unwrap().index, index);
        }
    }

    #[test]
    fn test_no_interior_zero_for_any_payload_length() {
        for len in 0..=PAYLOAD_SIZE {
            for fill in [0x00u8, 0x01, 0xFF] {
                let payload = vec![fill; len];
                let packet = encode(COMMAND, 0, &payload).unwrap();
                let bytes = packet.as_bytes();
                assert_eq!(bytes[0], 0);
                assert_eq!(bytes[PACKET_SIZE - 1], 0);
                assert!(
                    !bytes[1..PACKET_SIZE - 1].contains(&0),
                    "interior zero for len {len} fill {fill:#x}: {packet:?}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_id_leaves_destination_untouched() {
        let mut dst = encode(STATUS_A, 42, b"previous").unwrap();
        let before = dst;

        let err = encode_into(&mut dst, 0x21, 1, &[0x55; 12]).unwrap_err();

        assert_eq!(err, ProtocolError::InvalidId(0x21));
        assert_eq!(dst.checksum_field(), before.checksum_field());
        assert_eq!(dst, before);
    }

    #[test]
    fn test_invalid_id_on_fresh_encode() {
        assert_eq!(encode(0x00, 0, &[]), Err(ProtocolError::InvalidId(0x00)));
    }

    #[test]
    fn test_single_bit_tamper_is_checksum_error() {
        let packet = encode(IMP_B_MAG_TIME, 0x1234, &sample_payload(12, 9)).unwrap();
        let codes = code_positions(&packet);

        let mut checked = 0;
        for pos in cobs::OVERHEAD_POS + 1..cobs::END_POS {
            if codes.contains(&pos) {
                continue;
            }
            for bit in 0..8 {
                let mut bytes = packet.into_bytes();
                bytes[pos] ^= 1 << bit;
                if bytes[pos] == 0 {
                    continue;
                }
                let result = decode(&Packet::from_bytes(bytes));
                assert!(
                    matches!(result, Err(ProtocolError::ChecksumError { .. })),
                    "pos {pos} bit {bit}: {result:?}"
                );
                checked += 1;
            }
        }
        assert!(checked > 100);
    }

    #[test]
    fn test_corrupted_overhead_is_frame_error() {
        let packet = encode(STATUS_A, 3, b"status").unwrap();
        let mut bytes = packet.into_bytes();
        bytes[cobs::OVERHEAD_POS] = 0xFE;
        assert_eq!(
            decode(&Packet::from_bytes(bytes)),
            Err(ProtocolError::FrameError)
        );
    }

    #[test]
    fn test_decode_is_total_over_arbitrary_frames() {
        // xorshift32; deterministic, no external rng needed.
        let mut state = 0x9E37_79B9u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for _ in 0..20_000 {
            let mut bytes = [0u8; PACKET_SIZE];
            for byte in bytes.iter_mut() {
                *byte = next() as u8;
            }
            if next() % 2 == 0 {
                bytes[0] = 0;
                bytes[PACKET_SIZE - 1] = 0;
            }
            let _ = decode(&Packet::from_bytes(bytes));
        }

        assert_eq!(
            decode(&Packet::from_bytes([0; PACKET_SIZE])),
            Err(ProtocolError::FrameError)
        );
        assert_eq!(
            decode(&Packet::from_bytes([0xFF; PACKET_SIZE])),
            Err(ProtocolError::FrameError)
        );
    }

    #[test]
    fn test_message_encode_helper() {
        let message = Message {
            id: MESSAGE_A,
            index: 9,
            payload: *b"hello from A\0\0\0\0",
        };
        let decoded = decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.text(), "hello from A");
    }
}
