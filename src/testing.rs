//! Register level stand-in for the chip, shared by the unit tests

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard},
};

use embedded_hal::digital::{ErrorType, OutputPin};
use fugit::MillisDurationU32;

use crate::{
    config::{Config, Timing},
    registers::{self, ErrorStatus, FifoStatus, RfControl, RfStatus, Status, SystemConfig},
    Error, Interface, Result,
};

/// What the simulated card does after a frame goes out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// TX done, then this frame is received
    Frame(Vec<u8>),
    /// TX done, nothing comes back
    Silence,
    /// TX done, RX error with the collision flag
    Collision,
    /// TX done, RX error with the CRC flag
    CrcError,
    /// TX error
    TxError,
    /// Neither TX done nor TX error ever latches
    Stuck,
}

const FAKE_RSSI: u8 = 0x17;

#[derive(Default)]
struct Chip {
    regs: HashMap<u8, u32>,
    tx: Vec<u8>,
    rx: Vec<u8>,
    replies: HashMap<Vec<u8>, Reply>,
    once: HashMap<Vec<u8>, Reply>,
    default_reply: Option<Reply>,
    transmitted: Vec<Vec<u8>>,
    stuck: HashMap<u8, u32>,
    field_fault: bool,
    bus_fault: bool,
    eeprom: HashMap<u8, u8>,
    eeprom_fault: bool,
    reset_pulses: usize,
    soft_resets: usize,
}

impl Chip {
    fn reg(&self, addr: u8) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn power_on_reset(&mut self) {
        self.regs.clear();
        self.tx.clear();
        self.rx.clear();
    }

    fn read(&self, addr: u8) -> u32 {
        if let Some(&value) = self.stuck.get(&addr) {
            return value;
        }
        match addr {
            registers::STATUS => {
                let rf = RfControl::from(self.reg(registers::RF_CONTROL));
                let sys = SystemConfig::from(self.reg(registers::SYSTEM_CONFIG));
                let mut status = Status::default();
                status.set_rf_field(rf.field_on() && !self.field_fault);
                status.set_power_down(sys.power_down());
                status.set_idle(true);
                status.into()
            }
            registers::FIFO_STATUS => {
                let mut fifo = FifoStatus::default();
                fifo.set_rx_level(bilge::prelude::u10::new(self.rx.len() as u16));
                fifo.set_rx_empty(self.rx.is_empty());
                fifo.set_tx_empty(self.tx.is_empty());
                fifo.into()
            }
            registers::RF_STATUS => {
                let mut rf = RfStatus::default();
                rf.set_rssi(bilge::prelude::u5::new(FAKE_RSSI));
                rf.set_agc_locked(true);
                rf.into()
            }
            _ => self.reg(addr),
        }
    }

    fn write(&mut self, addr: u8, value: u32) {
        match addr {
            registers::IRQ_STATUS => {
                let left = self.reg(addr) & !value;
                self.regs.insert(addr, left);
            }
            registers::SYSTEM_CONFIG => {
                let mut sys = SystemConfig::from(value);
                if sys.reset() {
                    self.soft_resets += 1;
                    self.power_on_reset();
                    sys.set_reset(false);
                }
                self.regs.insert(addr, sys.into());
            }
            registers::TX_DATA => self.tx.clear(),
            registers::RX_DATA => {}
            registers::TX_LENGTH_MSB => {
                self.regs.insert(addr, value);
                self.start_transmission();
            }
            _ => {
                self.regs.insert(addr, value);
            }
        }
    }

    fn latch_irq(&mut self, bits: u32) {
        let irq = self.reg(registers::IRQ_STATUS) | bits;
        self.regs.insert(registers::IRQ_STATUS, irq);
    }

    fn start_transmission(&mut self) {
        let len = (self.reg(registers::TX_LENGTH_LSB) & 0xFF
            | (self.reg(registers::TX_LENGTH_MSB) & 0xFF) << 8) as usize;
        let frame: Vec<u8> = self.tx.iter().copied().take(len).collect();
        let reply = self
            .once
            .remove(&frame)
            .or_else(|| self.replies.get(&frame).cloned())
            .or_else(|| self.default_reply.clone())
            .unwrap_or(Reply::Silence);
        self.transmitted.push(frame);

        const TX_DONE: u32 = 1 << 1;
        const RX_DONE: u32 = 1 << 2;
        const RX_ERROR: u32 = 1 << 3;
        const TX_ERROR: u32 = 1 << 4;
        let mut error = ErrorStatus::default();
        self.rx.clear();
        match reply {
            Reply::Frame(data) => {
                self.rx = data;
                self.latch_irq(TX_DONE | RX_DONE);
            }
            Reply::Silence => self.latch_irq(TX_DONE),
            Reply::Collision => {
                error.set_collision(true);
                self.latch_irq(TX_DONE | RX_ERROR);
            }
            Reply::CrcError => {
                error.set_crc(true);
                self.latch_irq(TX_DONE | RX_ERROR);
            }
            Reply::TxError => self.latch_irq(TX_ERROR),
            Reply::Stuck => {}
        }
        self.regs.insert(registers::ERROR_STATUS, error.into());
    }
}

/// Cloneable handle to one simulated chip
#[derive(Clone, Default)]
pub struct FakeChip(Arc<Mutex<Chip>>);

impl FakeChip {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Chip> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checked(&self) -> Result<MutexGuard<'_, Chip>> {
        let chip = self.lock();
        if chip.bus_fault {
            Err(Error::Bus)
        } else {
            Ok(chip)
        }
    }

    /// Script the reply to one exact transmitted frame
    pub fn respond(&self, frame: &[u8], reply: Reply) {
        self.lock().replies.insert(frame.to_vec(), reply);
    }

    /// Script a reply used for the next transmission of `frame` only
    pub fn respond_once(&self, frame: &[u8], reply: Reply) {
        self.lock().once.insert(frame.to_vec(), reply);
    }

    /// Reply used for frames without a scripted reply
    pub fn respond_default(&self, reply: Reply) {
        self.lock().default_reply = Some(reply);
    }

    /// Every frame transmitted so far, oldest first
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.lock().transmitted.clone()
    }

    pub fn register(&self, addr: u8) -> u32 {
        self.lock().read(addr)
    }

    /// Make reads of `addr` return `value` regardless of writes
    pub fn set_stuck_register(&self, addr: u8, value: u32) {
        self.lock().stuck.insert(addr, value);
    }

    /// Keep STATUS.rf_field low even with the field switched on
    pub fn set_field_fault(&self, fault: bool) {
        self.lock().field_fault = fault;
    }

    /// Fail every bus access with [`Error::Bus`]
    pub fn set_bus_fault(&self, fault: bool) {
        self.lock().bus_fault = fault;
    }

    /// Program EEPROM bytes from `addr` on; unset bytes read as zero
    pub fn set_eeprom(&self, addr: u8, data: &[u8]) {
        let mut chip = self.lock();
        for (&byte, a) in data.iter().zip(addr..) {
            chip.eeprom.insert(a, byte);
        }
    }

    /// Fail EEPROM reads with [`Error::Eeprom`]
    pub fn set_eeprom_fault(&self, fault: bool) {
        self.lock().eeprom_fault = fault;
    }

    /// Put `data` into the RX buffer as if it had just been received
    pub fn load_rx(&self, data: &[u8]) {
        self.lock().rx = data.to_vec();
    }

    pub fn rssi(&self) -> u8 {
        FAKE_RSSI
    }

    pub fn powered_down(&self) -> bool {
        SystemConfig::from(self.lock().reg(registers::SYSTEM_CONFIG)).power_down()
    }

    pub fn field_on(&self) -> bool {
        RfControl::from(self.lock().reg(registers::RF_CONTROL)).field_on()
    }

    pub fn reset_pulses(&self) -> usize {
        self.lock().reset_pulses
    }

    pub fn soft_resets(&self) -> usize {
        self.lock().soft_resets
    }
}

impl Interface for FakeChip {
    fn write_register(&self, addr: u8, value: u32) -> Result<()> {
        self.checked()?.write(addr, value);
        Ok(())
    }

    fn read_register(&self, addr: u8) -> Result<u32> {
        Ok(self.checked()?.read(addr))
    }

    fn modify_register(&self, addr: u8, f: impl FnOnce(u32) -> u32) -> Result<()> {
        let mut chip = self.checked()?;
        let old = chip.read(addr);
        let new = f(old);
        if new != old {
            chip.write(addr, new);
        }
        Ok(())
    }

    fn write_buffer(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.checked()?.tx = data.to_vec();
        Ok(())
    }

    fn read_buffer(&self, buf: &mut [u8]) -> Result<()> {
        let chip = self.checked()?;
        for (dst, src) in buf.iter_mut().zip(chip.rx.iter().chain(core::iter::repeat(&0u8))) {
            *dst = *src;
        }
        Ok(())
    }

    fn read_eeprom(&self, addr: u8, buf: &mut [u8]) -> Result<()> {
        crate::interface::check_eeprom_range(addr, buf.len())?;
        let chip = self.checked()?;
        if chip.eeprom_fault {
            return Err(Error::Eeprom);
        }
        for (dst, a) in buf.iter_mut().zip(addr..) {
            *dst = chip.eeprom.get(&a).copied().unwrap_or(0);
        }
        Ok(())
    }
}

/// Reset line wired to a [`FakeChip`]; a low level resets the chip
pub struct ResetLine(FakeChip);

impl ResetLine {
    pub fn new(chip: &FakeChip) -> Self {
        Self(chip.clone())
    }
}

impl ErrorType for ResetLine {
    type Error = Infallible;
}

impl OutputPin for ResetLine {
    fn set_low(&mut self) -> core::result::Result<(), Self::Error> {
        let mut chip = self.0.lock();
        chip.reset_pulses += 1;
        chip.power_on_reset();
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Self::Error> {
        Ok(())
    }
}

/// Timings short enough for tests
pub fn small_config() -> Config {
    let ms = MillisDurationU32::millis;
    Config {
        timing: Timing {
            busy_timeout: ms(5),
            settle_delay: ms(1),
            error_backoff: ms(20),
            scan_cycle_delay: ms(1),
            tx_timeout: ms(5),
            enqueue_timeout: ms(50),
            tick: ms(1),
            reset_pulse: ms(1),
        },
        ..Config::default()
    }
}
