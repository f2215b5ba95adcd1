//! CRC16 used to protect id, index and payload.

use crc::{Algorithm, Crc};

/// Generator polynomial shared by both flight computers and the ground segment.
pub const POLYNOMIAL: u16 = 0x724E;

/// MSB-first, zero initial value, no reflection, no final xor.
pub const PIONEERS_CRC16: Algorithm<u16> = Algorithm {
    width: 16,
    poly: POLYNOMIAL,
    init: 0x0000,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0xB4B4,
    residue: 0x0000,
};

const CRC16: Crc<u16> = Crc::<u16>::new(&PIONEERS_CRC16);

/// Compute the packet checksum over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
