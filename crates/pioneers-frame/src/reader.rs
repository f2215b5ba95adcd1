use bytes::{Buf, BytesMut};
use tracing::warn;

use crate::codec::{Packet, PACKET_SIZE};

const INITIAL_BUFFER_CAPACITY: usize = 4 * PACKET_SIZE;

/// Upper bound on buffered bytes; older bytes are discarded beyond this.
const MAX_BUFFERED: usize = 64 * PACKET_SIZE;

/// Assembles packets from an arbitrarily chunked byte stream.
///
/// Bytes are pushed in as they arrive; complete candidate frames are popped
/// with [`next_packet`](Self::next_packet). A candidate is a zero byte whose
/// next zero lies exactly `PACKET_SIZE - 1` bytes later, which is the only
/// shape a stuffed frame can have. Anything else is skipped byte by byte
/// until the stream is aligned again. Candidates are not decoded here.
#[derive(Debug)]
pub struct PacketReader {
    buf: BytesMut,
    dropped: u64,
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            dropped: 0,
        }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - MAX_BUFFERED;
            self.discard(excess);
        }
    }

    /// Pop the next aligned frame, if one is fully buffered.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.buf.iter().position(|&b| b == 0) {
                Some(0) => {}
                Some(start) => {
                    self.discard(start);
                    continue;
                }
                None => {
                    let len = self.buf.len();
                    self.discard(len);
                    return None;
                }
            }

            match self.buf[1..].iter().position(|&b| b == 0).map(|p| p + 1) {
                Some(end) if end == PACKET_SIZE - 1 => {
                    let mut bytes = [0u8; PACKET_SIZE];
                    bytes.copy_from_slice(&self.buf[..PACKET_SIZE]);
                    self.buf.advance(PACKET_SIZE);
                    return Some(Packet::from_bytes(bytes));
                }
                // Two delimiters too close together: the first zero was an end
                // marker or debris, restart from the second one.
                Some(end) if end < PACKET_SIZE - 1 => self.discard(end),
                Some(_) => self.discard(1),
                None if self.buf.len() >= PACKET_SIZE => self.discard(1),
                None => return None,
            }
        }
    }

    /// Bytes currently waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes skipped while resynchronizing.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }

    /// Forget any partially received frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        warn!(bytes = n, "discarding unaligned bytes while resynchronizing");
        self.buf.advance(n);
        self.dropped = self.dropped.saturating_add(n as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};
    use crate::ids::{IMU_A_ACC_GYR, IMU_A_MAG_TIME, STATUS_A};

    fn wire(packets: &[Packet]) -> Vec<u8> {
        packets.iter().flat_map(|p| p.as_bytes().to_vec()).collect()
    }

    #[test]
    fn read_single_packet() {
        let packet = encode(STATUS_A, 1, b"hello").unwrap();
        let mut reader = PacketReader::new();
        reader.extend(packet.as_bytes());

        assert_eq!(reader.next_packet(), Some(packet));
        assert_eq!(reader.next_packet(), None);
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.dropped_bytes(), 0);
    }

    #[test]
    fn debug_output_shows_progress() {
        let mut reader = PacketReader::new();
        reader.extend(&[7, 7, 7]);
        assert_eq!(reader.next_packet(), None);
        let shown = format!("{reader:?}");
        assert!(shown.starts_with("PacketReader"), "{shown}");
        assert!(shown.contains("dropped: 3"), "{shown}");
    }

    #[test]
    fn read_back_to_back_packets() {
        let p1 = encode(IMU_A_ACC_GYR, 1, &[1; 12]).unwrap();
        let p2 = encode(IMU_A_MAG_TIME, 1, &[2; 10]).unwrap();
        let p3 = encode(IMU_A_ACC_GYR, 2, &[3; 12]).unwrap();

        let mut reader = PacketReader::new();
        reader.extend(&wire(&[p1, p2, p3]));

        assert_eq!(reader.next_packet(), Some(p1));
        assert_eq!(reader.next_packet(), Some(p2));
        assert_eq!(reader.next_packet(), Some(p3));
        assert_eq!(reader.next_packet(), None);
        assert_eq!(reader.dropped_bytes(), 0);
    }

    #[test]
    fn partial_read_handling() {
        let packet = encode(STATUS_A, 4, b"slow").unwrap();
        let mut reader = PacketReader::new();

        for (i, byte) in packet.as_bytes().iter().enumerate() {
            if i < PACKET_SIZE - 1 {
                reader.extend(&[*byte]);
                assert_eq!(reader.next_packet(), None);
            } else {
                reader.extend(&[*byte]);
            }
        }
        assert_eq!(reader.next_packet(), Some(packet));
    }

    #[test]
    fn resynchronizes_after_garbage_prefix() {
        let packet = encode(STATUS_A, 9, b"aligned").unwrap();
        let mut bytes = vec![0x13, 0x37, 0x00, 0x42, 0x00, 0x00, 0x99];
        bytes.extend_from_slice(packet.as_bytes());

        let mut reader = PacketReader::new();
        reader.extend(&bytes);

        let found = reader.next_packet().unwrap();
        assert_eq!(decode(&found).unwrap().index, 9);
        assert_eq!(reader.dropped_bytes(), 7);
    }

    #[test]
    fn resynchronizes_after_truncated_frame() {
        let lost = encode(STATUS_A, 1, b"lost").unwrap();
        let kept = encode(STATUS_A, 2, b"kept").unwrap();

        let mut bytes = lost.as_bytes()[..10].to_vec();
        bytes.extend_from_slice(kept.as_bytes());

        let mut reader = PacketReader::new();
        reader.extend(&bytes);

        assert_eq!(reader.next_packet(), Some(kept));
        assert_eq!(reader.dropped_bytes(), 10);
    }

    #[test]
    fn waits_for_rest_of_frame() {
        let packet = encode(STATUS_A, 3, b"half").unwrap();
        let mut reader = PacketReader::new();
        reader.extend(&packet.as_bytes()[..12]);
        assert_eq!(reader.next_packet(), None);
        assert_eq!(reader.buffered(), 12);

        reader.extend(&packet.as_bytes()[12..]);
        assert_eq!(reader.next_packet(), Some(packet));
    }

    #[test]
    fn zero_free_noise_is_discarded() {
        let mut reader = PacketReader::new();
        reader.extend(&[0xAB; 100]);
        assert_eq!(reader.next_packet(), None);
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.dropped_bytes(), 100);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut reader = PacketReader::new();
        let mut noise = vec![0u8];
        noise.extend(std::iter::repeat_n(0x7F, MAX_BUFFERED * 2));
        reader.extend(&noise);
        assert!(reader.buffered() <= MAX_BUFFERED);
    }
}
