//! ISO15693 inventory response validation

use crate::{
    card::{CardMetadata, CardRecord, Uid},
    crc, Error, Protocol, Result,
};

/// Response flag: the card reports an error
pub const FLAG_ERROR: u8 = 1 << 0;
/// Allocation class byte every ISO15693 UID starts with (MSB first)
pub const UID_MSB: u8 = 0xE0;

const INVENTORY_LEN: usize = 10;
const UID_LEN: usize = 8;

/// Decode `flags | DSFID | UID (LSB first) [| CRC16]`
///
/// The returned UID is reordered MSB first.
pub fn parse_inventory(raw: &[u8]) -> Result<CardRecord> {
    if raw.first().is_some_and(|flags| flags & FLAG_ERROR != 0) {
        log::debug!("ISO15693: error flag set ({:#04X})", raw[0]);
        return Err(Error::Protocol);
    }
    let frame = match raw.len() {
        INVENTORY_LEN => raw,
        len if len == INVENTORY_LEN + 2 => crc::strip(raw, crc::crc_b).ok_or_else(|| {
            log::debug!("ISO15693: CRC mismatch");
            Error::Crc
        })?,
        len => {
            log::debug!("ISO15693: bad inventory length {len}");
            return Err(Error::Protocol);
        }
    };

    let dsfid = frame[1];
    let mut uid = [0u8; UID_LEN];
    uid.copy_from_slice(&frame[2..2 + UID_LEN]);
    uid.reverse();

    if uid[0] != UID_MSB {
        log::debug!("ISO15693: UID MSB {:#04X} is not {UID_MSB:#04X}", uid[0]);
        return Err(Error::Protocol);
    }
    if uid.iter().all(|&b| b == 0x00) || uid.iter().all(|&b| b == 0xFF) {
        return Err(Error::Protocol);
    }

    Ok(CardRecord::new(
        Uid::from_slice(&uid)?,
        Protocol::Iso15693,
        CardMetadata::Iso15693 { dsfid, afi: None },
    ))
}
