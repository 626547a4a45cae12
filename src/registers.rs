use bilge::prelude::*;

use crate::{Interface, Result};

pub const SYSTEM_CONFIG: u8 = 0x00;
pub const IRQ_ENABLE: u8 = 0x01;
pub const IRQ_STATUS: u8 = 0x02;
pub const ERROR_STATUS: u8 = 0x03;
pub const STATUS: u8 = 0x04;
pub const RF_CONTROL: u8 = 0x05;
pub const RF_STATUS: u8 = 0x10;
pub const RX_CONF1: u8 = 0x1A;
pub const RX_CONF3: u8 = 0x1C;
pub const TX_CONF1: u8 = 0x1F;
pub const ISO14443A_TX_DRIVER: u8 = 0x2C;
pub const ISO14443B_TX_DRIVER: u8 = 0x2D;
pub const ISO15693_TX_DRIVER: u8 = 0x2E;
pub const NFCIP1_TX_DRIVER: u8 = 0x2F;
/// Writing resets the TX buffer pointer
pub const TX_DATA: u8 = 0x40;
/// Writing resets the RX buffer pointer
pub const RX_DATA: u8 = 0x41;
pub const TX_LENGTH_LSB: u8 = 0x42;
/// Writing the high length byte starts the transmission
pub const TX_LENGTH_MSB: u8 = 0x43;
pub const FIFO_CONTROL: u8 = 0x44;
pub const FIFO_STATUS: u8 = 0x45;
pub const TX_TIMER_CONFIG: u8 = 0x46;
pub const RX_TIMER_CONFIG: u8 = 0x47;
pub const POWER_DOWN: u8 = 0x48;
pub const WAKE_UP: u8 = 0x49;
pub const ANTENNA_CTRL: u8 = 0x4A;
pub const ANTENNA_TUNING_LSB: u8 = 0x4B;
pub const ANTENNA_TUNING_MSB: u8 = 0x4C;
pub const CRC_CONFIG: u8 = 0x4D;

/// EEPROM addresses, read with [`Interface::read_eeprom`]
pub mod eeprom {
    pub const DIE_IDENTIFIER: u8 = 0x00;
    /// Little endian, minor then major
    pub const PRODUCT_VERSION: u8 = 0x10;
    /// Little endian, minor then major
    pub const FIRMWARE_VERSION: u8 = 0x12;
    pub const IRQ_PIN_CONFIG: u8 = 0x1A;
    pub const SIZE: usize = 0xFF;
}

/// Drive strength bits of the per protocol TX driver registers
pub const TX_DRIVER_STRENGTH_MASK: u32 = 0x0F;

/// Typed view over one 32 bit register
pub trait Register: Copy + Sized + PartialEq + From<u32> + Into<u32> {
    const ADDRESS: u8;
    fn read<I: Interface>(iface: &I) -> Result<Self> {
        Ok(Self::from(iface.read_register(Self::ADDRESS)?))
    }
    fn write<I: Interface>(self, iface: &I) -> Result<()> {
        iface.write_register(Self::ADDRESS, self.into())
    }
    fn modify<I: Interface>(iface: &I, f: impl FnOnce(&mut Self)) -> Result<()> {
        iface.modify_register(Self::ADDRESS, |raw| {
            let mut reg = Self::from(raw);
            f(&mut reg);
            reg.into()
        })
    }
}

macro_rules! register_impl {
    ($type:ty, $addr:expr) => {
        impl Register for $type {
            const ADDRESS: u8 = $addr;
        }
    };
}

register_impl!(SystemConfig, SYSTEM_CONFIG);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemConfig {
    /// Soft reset, cleared by the chip when done
    pub reset: bool,
    pub power_down: bool,
    pub standby: bool,
    /// IRQ pin active high
    pub irq_pol: bool,
    /// IRQ pin open drain
    pub irq_od: bool,
    /// 13.56 MHz clock instead of 27.12 MHz
    pub clock_sel: bool,
    reserved: u26,
}

register_impl!(IrqEnable, IRQ_ENABLE);
/// Interrupt sources routed to the IRQ pin
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqEnable {
    pub rf_field_active: bool,
    pub tx_done: bool,
    pub rx_done: bool,
    pub rx_error: bool,
    pub tx_error: bool,
    pub idle: bool,
    pub general_error: bool,
    pub wake_up: bool,
    reserved: u24,
}

register_impl!(IrqStatus, IRQ_STATUS);
/// Latched interrupt flags
///
/// Write 1 to clear: writing a value back only clears the bits set in it.
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqStatus {
    pub rf_field_active: bool,
    pub tx_done: bool,
    pub rx_done: bool,
    pub rx_error: bool,
    pub tx_error: bool,
    pub idle: bool,
    pub general_error: bool,
    pub wake_up: bool,
    reserved: u24,
}

impl IrqStatus {
    /// Mask that clears every latched flag
    pub const ALL: u32 = 0xFF;
}

register_impl!(ErrorStatus, ERROR_STATUS);
/// Cause of the last RX error
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorStatus {
    pub protocol: bool,
    pub crc: bool,
    pub parity: bool,
    pub framing: bool,
    pub collision: bool,
    pub rx_overflow: bool,
    pub rx_underflow: bool,
    reserved: u25,
}

register_impl!(Status, STATUS);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub rf_field: bool,
    pub tx_active: bool,
    pub rx_active: bool,
    pub idle: bool,
    pub power_down: bool,
    reserved: u27,
}

register_impl!(RfControl, RF_CONTROL);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfControl {
    /// TX driver configuration
    pub drv: u4,
    /// TX driver current
    pub drv_current: u3,
    pub field_on: bool,
    reserved: u24,
}

impl RfControl {
    /// Bits that read back exactly as written
    pub const STABLE_MASK: u32 = 0x8F;
}

register_impl!(RfStatus, RF_STATUS);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfStatus {
    pub rssi: u5,
    /// External field detected
    pub field_detected: bool,
    pub agc_locked: bool,
    reserved: u25,
}

pub mod rx_conf1 {
    use bilge::prelude::*;

    #[bitsize(3)]
    #[derive(FromBits, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum Bandwidth {
        #[default]
        Mhz1_8 = 0,
        Mhz1_2 = 1,
        Mhz0_9 = 2,
        Mhz0_6 = 3,
        Mhz0_45 = 4,
        Mhz0_3 = 5,
        Mhz0_225 = 6,
        Mhz0_15 = 7,
    }
}

register_impl!(RxConf1, RX_CONF1);
/// Receiver sensitivity
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxConf1 {
    /// 6 dB per step, 0 to 42 dB
    pub gain: u3,
    pub bandwidth: rx_conf1::Bandwidth,
    reserved: u26,
}

register_impl!(RxConf3, RX_CONF3);
/// Detection thresholds
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxConf3 {
    pub min_mod_depth: u4,
    pub iq_threshold: u3,
    reserved: u25,
}

pub mod tx_conf1 {
    use bilge::prelude::*;

    #[bitsize(2)]
    #[derive(FromBits, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum Bitrate {
        #[default]
        Kbps106 = 0,
        Kbps212 = 1,
        Kbps424 = 2,
        Kbps848 = 3,
    }

    #[bitsize(2)]
    #[derive(FromBits, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum Modulation {
        /// ISO14443A
        #[default]
        Ask100 = 0,
        /// ISO14443B and ISO15693
        Ask10 = 1,
        #[fallback]
        Reserved,
    }
}

register_impl!(TxConf1, TX_CONF1);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxConf1 {
    pub bitrate: tx_conf1::Bitrate,
    pub modulation: tx_conf1::Modulation,
    reserved: u2,
    pub preamble: u2,
    reserved: u24,
}

register_impl!(FifoControl, FIFO_CONTROL);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoControl {
    pub tx_reset: bool,
    pub rx_reset: bool,
    pub enable: bool,
    reserved: u29,
}

register_impl!(FifoStatus, FIFO_STATUS);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStatus {
    pub tx_empty: bool,
    pub tx_full: bool,
    pub rx_empty: bool,
    pub rx_full: bool,
    reserved: u4,
    /// Number of bytes received into the RX buffer
    pub rx_level: u10,
    reserved: u14,
}

pub mod crc_config {
    use bilge::prelude::*;

    #[bitsize(2)]
    #[derive(FromBits, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum CrcType {
        #[default]
        Iso14443A = 0,
        Iso14443B = 1,
        Iso15693 = 2,
        Reserved = 3,
    }
}

register_impl!(CrcConfig, CRC_CONFIG);
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrcConfig {
    /// Append CRC to transmitted frames
    pub tx_enable: bool,
    /// Check and strip CRC of received frames
    pub rx_enable: bool,
    pub crc_type: crc_config::CrcType,
    reserved: u28,
}
