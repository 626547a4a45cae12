//! ISO14443A response validation

use crate::{
    card::{CardMetadata, CardRecord, Uid},
    Error, Protocol, Result,
};

/// REQA, sent as a 7 bit short frame
pub const REQA: u8 = 0x26;

/// Cascade tag, marks an incomplete UID in a cascade level
pub const CASCADE_TAG: u8 = 0x88;
/// First byte of a randomly generated single size UID
pub const RANDOM_ID: u8 = 0x08;

/// SAK values of known card families
pub const KNOWN_SAKS: [u8; 13] = [
    0x00, // Ultralight, NTAG
    0x04, // UID incomplete
    0x08, // Classic 1K
    0x09, // Mini
    0x10, // Plus 2K SL2
    0x11, // Plus 4K SL2
    0x18, // Classic 4K
    0x20, // DESFire, Plus SL3, ISO14443-4
    0x24, // DESFire EV1
    0x28, // SmartMX with Classic 1K
    0x38, // SmartMX with Classic 4K
    0x88, // Infineon Classic 1K
    0x98, // Pro
];

/// Length of the ATQA and SAK prefix
const HEADER_LEN: usize = 3;

fn uniform(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0x00) || bytes.iter().all(|&b| b == 0xFF)
}

/// Check the UID candidate of an anticollision response
pub fn check_uid(uid: &[u8]) -> Result<()> {
    let valid = match uid.len() {
        4 => uid[0] != RANDOM_ID && uid[0] != 0x00 && !uniform(uid),
        7 => uid[3] == CASCADE_TAG && uid[0] != 0x00 && !uniform(&uid[4..]),
        10 => !uniform(uid),
        len => {
            log::debug!("ISO14443A: bad UID length {len}");
            return Err(Error::Protocol);
        }
    };
    if valid {
        Ok(())
    } else {
        log::debug!("ISO14443A: rejected UID {uid:02X?}");
        Err(Error::Protocol)
    }
}

/// Decode `ATQA (LE) | SAK | UID` into a card record
pub fn parse_response(raw: &[u8]) -> Result<CardRecord> {
    if raw.len() < HEADER_LEN {
        log::debug!("ISO14443A: short response ({} bytes)", raw.len());
        return Err(Error::Protocol);
    }
    let (header, uid) = raw.split_at(HEADER_LEN);
    let atqa = u16::from_le_bytes([header[0], header[1]]);
    let sak = header[2];

    if atqa == 0x0000 || atqa == 0xFFFF {
        log::debug!("ISO14443A: invalid ATQA {atqa:#06X}");
        return Err(Error::Protocol);
    }
    if !KNOWN_SAKS.contains(&sak) {
        log::debug!("ISO14443A: unknown SAK {sak:#04X}");
        return Err(Error::Protocol);
    }
    check_uid(uid)?;

    Ok(CardRecord::new(
        Uid::from_slice(uid)?,
        Protocol::Iso14443A,
        CardMetadata::Iso14443A { atqa, sak },
    ))
}
