use fugit::MillisDurationU32;

use crate::{
    config::RfConfig,
    nfc_a,
    registers::{self, crc_config::CrcType, tx_conf1, TxConf1},
};

/// RF protocols the reader polls for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    /// MIFARE, NTAG and other proximity cards
    Iso14443A,
    /// Proximity cards with 10% ASK signalling
    Iso14443B,
    /// Vicinity cards (ICODE, Tag-it)
    Iso15693,
}

impl Protocol {
    /// Polling order
    pub const ALL: [Protocol; 3] = [Protocol::Iso14443A, Protocol::Iso14443B, Protocol::Iso15693];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn mask(self) -> ProtocolMask {
        match self {
            Protocol::Iso14443A => ProtocolMask::ISO14443A,
            Protocol::Iso14443B => ProtocolMask::ISO14443B,
            Protocol::Iso15693 => ProtocolMask::ISO15693,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Iso14443A => "ISO14443A",
            Protocol::Iso14443B => "ISO14443B",
            Protocol::Iso15693 => "ISO15693",
        }
    }
}

impl core::fmt::Display for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Set of protocols enabled for scanning
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolMask: u8 {
        const ISO14443A = 1 << 0;
        const ISO14443B = 1 << 1;
        const ISO15693 = 1 << 2;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ProtocolMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ProtocolMask({=u8:#b})", self.bits())
    }
}

impl ProtocolMask {
    /// Parse a raw mask, rejecting empty masks and unknown bits
    pub fn from_raw(bits: u8) -> Option<Self> {
        Self::from_bits(bits).filter(|mask| !mask.is_empty())
    }

    pub fn contains_protocol(self, protocol: Protocol) -> bool {
        self.contains(protocol.mask())
    }

    /// Next enabled protocol at or after position `from` in [`Protocol::ALL`], wrapping around
    pub fn next_from(self, from: usize) -> Option<(usize, Protocol)> {
        let n = Protocol::ALL.len();
        (0..n)
            .map(|offset| (from + offset) % n)
            .map(|idx| (idx, Protocol::ALL[idx]))
            .find(|&(_, protocol)| self.contains_protocol(protocol))
    }
}

impl From<Protocol> for ProtocolMask {
    fn from(protocol: Protocol) -> Self {
        protocol.mask()
    }
}

/// Register programming and timing for one protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub protocol: Protocol,
    /// Bitrate and modulation
    pub tx_conf: TxConf1,
    /// Address of the protocol's TX driver register
    pub tx_driver_reg: u8,
    pub tx_power: u8,
    pub rx_gain: u8,
    pub crc_type: CrcType,
    /// Command that makes a card in the field answer
    pub detect_command: &'static [u8],
    /// Reply window after the detect command went out
    pub detect_timeout: MillisDurationU32,
    pub data_timeout: MillisDurationU32,
}

const DETECT_ISO14443A: &[u8] = &[nfc_a::REQA];
/// REQB, AFI 0, one slot
const DETECT_ISO14443B: &[u8] = &[0x05, 0x00, 0x00];
/// Inventory, one slot, no mask
const DETECT_ISO15693: &[u8] = &[0x26, 0x01, 0x00];

fn tx_conf(bitrate: tx_conf1::Bitrate, modulation: tx_conf1::Modulation) -> TxConf1 {
    let mut conf = TxConf1::default();
    conf.set_bitrate(bitrate);
    conf.set_modulation(modulation);
    conf
}

impl ProtocolConfig {
    fn new(protocol: Protocol, rf: &RfConfig) -> Self {
        let data_timeout = MillisDurationU32::millis(20);
        let base = |tx_conf: TxConf1,
                    tx_driver_reg: u8,
                    crc_type: CrcType,
                    detect_command: &'static [u8],
                    detect_timeout: MillisDurationU32| Self {
            protocol,
            tx_conf,
            tx_driver_reg,
            tx_power: rf.tx_power,
            rx_gain: rf.rx_gain,
            crc_type,
            detect_command,
            detect_timeout,
            data_timeout,
        };
        match protocol {
            Protocol::Iso14443A => base(
                tx_conf(tx_conf1::Bitrate::Kbps106, tx_conf1::Modulation::Ask100),
                registers::ISO14443A_TX_DRIVER,
                CrcType::Iso14443A,
                DETECT_ISO14443A,
                MillisDurationU32::millis(2),
            ),
            Protocol::Iso14443B => base(
                tx_conf(tx_conf1::Bitrate::Kbps106, tx_conf1::Modulation::Ask10),
                registers::ISO14443B_TX_DRIVER,
                CrcType::Iso14443B,
                DETECT_ISO14443B,
                MillisDurationU32::millis(2),
            ),
            // 26.48 kbps shares the 212 kbps selector
            Protocol::Iso15693 => base(
                tx_conf(tx_conf1::Bitrate::Kbps212, tx_conf1::Modulation::Ask10),
                registers::ISO15693_TX_DRIVER,
                CrcType::Iso15693,
                DETECT_ISO15693,
                MillisDurationU32::millis(5),
            ),
        }
    }
}

/// Per protocol configuration, built once from the RF settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolTable {
    entries: [ProtocolConfig; 3],
}

impl ProtocolTable {
    pub fn new(rf: &RfConfig) -> Self {
        Self {
            entries: Protocol::ALL.map(|protocol| ProtocolConfig::new(protocol, rf)),
        }
    }

    pub fn get(&self, protocol: Protocol) -> &ProtocolConfig {
        &self.entries[protocol.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolConfig> {
        self.entries.iter()
    }
}
