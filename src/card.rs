use core::fmt::{self, Write};

use fugit::MillisDurationU64;
use heapless::{String, Vec};

use crate::{Error, Protocol, Result};

/// Longest identifier any supported protocol produces (triple size ISO14443A UID)
pub const MAX_UID_LEN: usize = 10;

/// `XX:` per byte without the trailing colon
pub type UidString = String<{ MAX_UID_LEN * 3 - 1 }>;

/// Card identifier, most significant byte first for ISO15693
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uid(Vec<u8, MAX_UID_LEN>);

impl Uid {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidArgument);
        }
        Vec::from_slice(bytes)
            .map(Self)
            .map_err(|_| Error::BufferOverflow)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Colon separated upper case hex, e.g. `DE:AD:BE:EF`
    pub fn to_hex_string(&self) -> UidString {
        let mut out = UidString::new();
        // capacity covers MAX_UID_LEN bytes
        let _ = write!(out, "{self}");
        out
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(':')?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({self})")
    }
}

impl AsRef<[u8]> for Uid {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CardMetadata {
    Iso14443A {
        atqa: u16,
        sak: u8,
    },
    Iso14443B {
        application_data: [u8; 4],
        protocol_info: [u8; 3],
    },
    Iso15693 {
        dsfid: u8,
        /// Not part of the inventory response
        afi: Option<u8>,
    },
}

/// A validated card detection
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CardRecord {
    pub uid: Uid,
    pub protocol: Protocol,
    pub metadata: CardMetadata,
    /// Raw RSSI reading taken right after reception
    pub rssi: u8,
    /// Time since the driver was created
    pub timestamp: MillisDurationU64,
}

impl CardRecord {
    /// Record without RSSI or timestamp, filled in by the reader
    pub fn new(uid: Uid, protocol: Protocol, metadata: CardMetadata) -> Self {
        Self {
            uid,
            protocol,
            metadata,
            rssi: 0,
            timestamp: MillisDurationU64::from_ticks(0),
        }
    }

    pub fn uid_len(&self) -> usize {
        self.uid.len()
    }
}
