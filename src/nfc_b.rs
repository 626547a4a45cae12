//! ISO14443B ATQB validation

use crate::{
    card::{CardMetadata, CardRecord, Uid},
    crc, Error, Protocol, Result,
};

/// First byte of every ATQB
pub const ATQB_MARKER: u8 = 0x50;
const ATQB_LEN: usize = 12;

/// Decode `0x50 | PUPI | application data | protocol info [| CRC_B]`
pub fn parse_atqb(raw: &[u8]) -> Result<CardRecord> {
    let frame = match raw.len() {
        ATQB_LEN => raw,
        len if len == ATQB_LEN + 2 => crc::strip(raw, crc::crc_b).ok_or_else(|| {
            log::debug!("ISO14443B: CRC_B mismatch");
            Error::Crc
        })?,
        len => {
            log::debug!("ISO14443B: bad ATQB length {len}");
            return Err(Error::Protocol);
        }
    };
    if frame[0] != ATQB_MARKER {
        log::debug!("ISO14443B: not an ATQB ({:#04X})", frame[0]);
        return Err(Error::Protocol);
    }

    let pupi = &frame[1..5];
    if pupi.iter().all(|&b| b == 0x00) || pupi.iter().all(|&b| b == 0xFF) {
        log::debug!("ISO14443B: rejected PUPI {pupi:02X?}");
        return Err(Error::Protocol);
    }
    let mut application_data = [0u8; 4];
    application_data.copy_from_slice(&frame[5..9]);
    let mut protocol_info = [0u8; 3];
    protocol_info.copy_from_slice(&frame[9..12]);

    Ok(CardRecord::new(
        Uid::from_slice(pupi)?,
        Protocol::Iso14443B,
        CardMetadata::Iso14443B {
            application_data,
            protocol_info,
        },
    ))
}
