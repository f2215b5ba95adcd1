//! In-place Consistent Overhead Byte Stuffing over a packet frame.
//!
//! The stuffed region starts at the overhead byte and runs up to the end
//! marker, which doubles as the COBS delimiter. Each code byte holds the
//! distance to the next code byte (or to the end marker); the data bytes it
//! replaced were zero.

use crate::codec::{PACKET_SIZE, PAYLOAD_SIZE};
use crate::error::{ProtocolError, Result};

/// Index of the COBS overhead byte.
pub const OVERHEAD_POS: usize = 1;

/// Index of the end marker (the COBS delimiter).
pub const END_POS: usize = PACKET_SIZE - 1;

const _: () = assert!(END_POS - OVERHEAD_POS < 0xFF);
const _: () = assert!(PACKET_SIZE == 8 + PAYLOAD_SIZE);

/// Stuff `frame[OVERHEAD_POS..END_POS]` in place and write both delimiters.
///
/// The overhead byte's previous content is ignored.
pub fn stuff(frame: &mut [u8; PACKET_SIZE]) {
    frame[0] = 0;
    frame[END_POS] = 0;

    let mut code_pos = OVERHEAD_POS;
    for pos in OVERHEAD_POS + 1..=END_POS {
        if pos == END_POS || frame[pos] == 0 {
            frame[code_pos] = (pos - code_pos) as u8;
            code_pos = pos;
        }
    }
}

/// Reverse [`stuff`] in place.
///
/// Fails with [`ProtocolError::FrameError`] if a delimiter is not zero, an
/// interior byte is zero, or the chain of code bytes does not land exactly on
/// the end marker. On failure the frame content is unspecified.
pub fn unstuff(frame: &mut [u8; PACKET_SIZE]) -> Result<()> {
    if frame[0] != 0 || frame[END_POS] != 0 {
        return Err(ProtocolError::FrameError);
    }
    if frame[OVERHEAD_POS..END_POS].contains(&0) {
        return Err(ProtocolError::FrameError);
    }

    let mut code_pos = OVERHEAD_POS;
    while code_pos < END_POS {
        let next = code_pos + usize::from(frame[code_pos]);
        if next > END_POS {
            return Err(ProtocolError::FrameError);
        }
        if code_pos != OVERHEAD_POS {
            frame[code_pos] = 0;
        }
        code_pos = next;
    }

    // `code_pos` can only equal END_POS here: every code byte is non-zero and
    // overshooting was rejected above.
    frame[OVERHEAD_POS] = 0;
    Ok(())
}
