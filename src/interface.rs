use std::{
    sync::{Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use embedded_hal::{
    digital::InputPin,
    spi::{Error as _, SpiDevice},
};
use fugit::MillisDurationU32;

use crate::{registers, Error, Result};

/// Register and buffer access to the chip
///
/// Implementations serialize every call with their own bus lock, so a single
/// interface can be shared between the worker thread and callers doing inline
/// reads.
pub trait Interface: Send + Sync {
    /// Write a 32 bit register
    fn write_register(&self, addr: u8, value: u32) -> Result<()>;
    /// Read a 32 bit register
    fn read_register(&self, addr: u8) -> Result<u32>;
    /// Read, transform and write back a register without releasing the bus in between
    ///
    /// The write is skipped when `f` leaves the value unchanged.
    fn modify_register(&self, addr: u8, f: impl FnOnce(u32) -> u32) -> Result<()>;
    /// Load the TX buffer, starting from its first byte
    fn write_buffer(&self, data: &[u8]) -> Result<()>;
    /// Fill `buf` from the start of the RX buffer
    fn read_buffer(&self, buf: &mut [u8]) -> Result<()>;
    /// Read `buf.len()` bytes of EEPROM starting at `addr`
    fn read_eeprom(&self, addr: u8, buf: &mut [u8]) -> Result<()>;
}

/// Range check shared by every [`Interface::read_eeprom`] implementation
pub(crate) fn check_eeprom_range(addr: u8, len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::InvalidArgument);
    }
    if usize::from(addr) + len > registers::eeprom::SIZE {
        log::error!("EEPROM read past the end: {addr:#04X} + {len}");
        return Err(Error::Eeprom);
    }
    Ok(())
}

pub mod spi_modes {
    /// Lower 7 bits set to the register address
    pub const REG_WRITE: u8 = 0b1 << 7;
    /// Lower 7 bits set to the register address
    pub const REG_READ: u8 = 0b0 << 7;
    pub const ADDR_MASK: u8 = 0x7F;
    /// Followed by the start address and the byte count
    pub const READ_EEPROM: u8 = 0x07;
}

/// Largest single SPI transfer used for buffer streaming
pub const MAX_CHUNK: usize = 64;
/// Size of the chip's TX and RX buffers
pub const BUFFER_SIZE: usize = 1024;

const BUSY_POLL: Duration = Duration::from_micros(100);

struct Bus<S, B> {
    spi: S,
    busy: B,
}

pub struct SpiInterface<S, B> {
    bus: Mutex<Bus<S, B>>,
    busy_timeout: Duration,
}

impl<S: SpiDevice, B: InputPin> SpiInterface<S, B> {
    /// `spi` owns chip select; `busy` is the BUSY output of the chip (high while processing)
    pub fn new(spi: S, busy: B, busy_timeout: MillisDurationU32) -> Self {
        Self {
            bus: Mutex::new(Bus { spi, busy }),
            busy_timeout: Duration::from_millis(busy_timeout.to_millis().into()),
        }
    }

    /// Give back the SPI device and BUSY pin
    pub fn release(self) -> (S, B) {
        let bus = self
            .bus
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (bus.spi, bus.busy)
    }

    fn lock(&self) -> MutexGuard<'_, Bus<S, B>> {
        self.bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: SpiDevice, B: InputPin> Bus<S, B> {
    /// Poll BUSY until it goes low
    fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while self.busy.is_high().map_err(|_| Error::Bus)? {
            if start.elapsed() >= timeout {
                log::warn!("BUSY still high after {} ms", timeout.as_millis());
                return Err(Error::Timeout);
            }
            thread::sleep(BUSY_POLL);
        }
        Ok(())
    }

    fn write(&mut self, timeout: Duration, data: &[u8]) -> Result<()> {
        self.wait_ready(timeout)?;
        self.spi.write(data).map_err(|e| {
            log::error!("SPI write failed: {:?}", e.kind());
            Error::Bus
        })
    }

    fn read(&mut self, timeout: Duration, buf: &mut [u8]) -> Result<()> {
        self.wait_ready(timeout)?;
        self.spi.read(buf).map_err(|e| {
            log::error!("SPI read failed: {:?}", e.kind());
            Error::Bus
        })
    }

    fn write_register(&mut self, timeout: Duration, addr: u8, value: u32) -> Result<()> {
        log::trace!("Register {addr:#04X}, write {value:#010X}");
        let [b0, b1, b2, b3] = value.to_be_bytes();
        let frame = [spi_modes::REG_WRITE | (addr & spi_modes::ADDR_MASK), b0, b1, b2, b3];
        self.write(timeout, &frame)
    }

    fn read_register(&mut self, timeout: Duration, addr: u8) -> Result<u32> {
        self.write(timeout, &[spi_modes::REG_READ | (addr & spi_modes::ADDR_MASK)])?;
        let mut raw = [0u8; 4];
        self.read(timeout, &mut raw)?;
        let value = u32::from_be_bytes(raw);
        log::trace!("Register {addr:#04X}, read {value:#010X}");
        Ok(value)
    }
}

impl<S, B> Interface for SpiInterface<S, B>
where
    S: SpiDevice + Send,
    B: InputPin + Send,
{
    fn write_register(&self, addr: u8, value: u32) -> Result<()> {
        self.lock().write_register(self.busy_timeout, addr, value)
    }

    fn read_register(&self, addr: u8) -> Result<u32> {
        self.lock().read_register(self.busy_timeout, addr)
    }

    fn modify_register(&self, addr: u8, f: impl FnOnce(u32) -> u32) -> Result<()> {
        let mut bus = self.lock();
        let old = bus.read_register(self.busy_timeout, addr)?;
        let new = f(old);
        if new != old {
            bus.write_register(self.busy_timeout, addr, new)
        } else {
            Ok(())
        }
    }

    fn write_buffer(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if data.len() > BUFFER_SIZE {
            log::error!("TX buffer overflow: {} > {}", data.len(), BUFFER_SIZE);
            return Err(Error::BufferOverflow);
        }
        let mut bus = self.lock();
        bus.write_register(self.busy_timeout, registers::TX_DATA, 0)?;
        for chunk in data.chunks(MAX_CHUNK) {
            bus.write(self.busy_timeout, chunk)?;
        }
        log::trace!("Wrote {} bytes to TX buffer", data.len());
        Ok(())
    }

    fn read_buffer(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() > BUFFER_SIZE {
            return Err(Error::BufferOverflow);
        }
        let mut bus = self.lock();
        bus.write_register(self.busy_timeout, registers::RX_DATA, 0)?;
        for chunk in buf.chunks_mut(MAX_CHUNK) {
            bus.read(self.busy_timeout, chunk)?;
        }
        log::trace!("Read {} bytes from RX buffer", buf.len());
        Ok(())
    }

    fn read_eeprom(&self, addr: u8, buf: &mut [u8]) -> Result<()> {
        check_eeprom_range(addr, buf.len())?;
        // range check bounds the count to the EEPROM size
        let len = buf.len() as u8;
        let eeprom = |e| match e {
            Error::Bus => Error::Eeprom,
            e => e,
        };
        let mut bus = self.lock();
        bus.write(self.busy_timeout, &[spi_modes::READ_EEPROM, addr, len])
            .map_err(eeprom)?;
        bus.read(self.busy_timeout, buf).map_err(eeprom)?;
        log::trace!("EEPROM {addr:#04X}, read {buf:02X?}");
        Ok(())
    }
}
