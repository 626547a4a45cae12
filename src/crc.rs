//! CRC16 used on the air interface
//!
//! Reflected 0x8408 polynomial. Frames carry the CRC LSB first.

const POLY: u16 = 0x8408;

fn crc16(preset: u16, data: &[u8]) -> u16 {
    data.iter().fold(preset, |mut crc, &byte| {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
        crc
    })
}

/// ISO14443-3 type B CRC, also CRC-16/ISO-IEC-13239 used by ISO15693
pub fn crc_b(data: &[u8]) -> u16 {
    !crc16(0xFFFF, data)
}

/// Split off and verify a trailing CRC
///
/// Returns the frame without its CRC, or `None` if the frame is too short or
/// the CRC does not match.
pub fn strip<'a>(frame: &'a [u8], crc: fn(&[u8]) -> u16) -> Option<&'a [u8]> {
    let split = frame.len().checked_sub(2)?;
    let (data, tail) = frame.split_at(split);
    (crc(data).to_le_bytes() == tail).then_some(data)
}
