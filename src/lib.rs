//! Asynchronous transaction engine for the NXP PN5180 NFC frontend
//!
//! The driver owns the SPI link, the BUSY handshake line and the reset line of
//! the chip, and runs a polling state machine on a dedicated worker thread
//! that cycles through the enabled RF protocols and reports validated cards
//! to the application.
//!
//! ```no_run
//! # fn demo<S, B, R>(spi: S, busy: B, reset: R) -> pn5180::Result<()>
//! # where
//! #     S: embedded_hal::spi::SpiDevice + Send + 'static,
//! #     B: embedded_hal::digital::InputPin + Send + 'static,
//! #     R: embedded_hal::digital::OutputPin + Send + 'static,
//! # {
//! use pn5180::{Config, Pn5180, ProtocolMask, SpiInterface};
//!
//! let config = Config::default();
//! let interface = SpiInterface::new(spi, busy, config.timing.busy_timeout);
//! let reader = Pn5180::new(interface, reset, config)?;
//! reader.start_scanning(ProtocolMask::ISO14443A | ProtocolMask::ISO15693, |card| {
//!     log::info!("card {}", card.uid);
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod card;
pub mod commands;
pub mod config;
pub mod crc;
pub mod device;
pub mod events;
pub mod interface;
pub mod iso15693;
pub mod nfc_a;
pub mod nfc_b;
pub mod protocol;
pub mod reader;
pub mod registers;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

pub use card::{CardMetadata, CardRecord, Uid, UidString};
pub use config::{Config, RfConfig, Timing};
pub use interface::{Interface, SpiInterface};
pub use protocol::{Protocol, ProtocolMask};
pub use reader::Pn5180;
pub use state_machine::{State, Statistics};

/// Driver errors
///
/// Transport failures surface as [`Error::Timeout`] (BUSY never cleared) or
/// [`Error::Bus`] (the SPI or a GPIO reported an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("timeout")]
    Timeout,
    #[error("CRC error")]
    Crc,
    #[error("authentication error")]
    Auth,
    /// Malformed or rejected response
    #[error("protocol error")]
    Protocol,
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("SPI communication error")]
    Bus,
    #[error("no tag present")]
    NoTagPresent,
    #[error("multiple tags present")]
    MultipleTagsPresent,
    #[error("hardware fault")]
    HardwareFault,
    #[error("device not initialized")]
    NotInitialized,
    #[error("device busy")]
    DeviceBusy,
    #[error("RF field error")]
    RfField,
    #[error("EEPROM error")]
    Eeprom,
    #[error("unsupported operation")]
    Unsupported,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
