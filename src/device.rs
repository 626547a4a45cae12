use std::{
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use bilge::prelude::*;
use embedded_hal::digital::OutputPin;
use fugit::{MillisDurationU32, MillisDurationU64};

use crate::{
    card::CardRecord,
    config::Config,
    interface::BUFFER_SIZE,
    iso15693, nfc_a, nfc_b,
    protocol::{ProtocolConfig, ProtocolTable},
    registers::{
        self, rx_conf1, CrcConfig, ErrorStatus, FifoControl, FifoStatus, IrqEnable, IrqStatus,
        Register, RfControl, RfStatus, RxConf1, RxConf3, Status, SystemConfig,
    },
    Error, Interface, Protocol, Result,
};

/// Poll period of the blocking IRQ waits
const IRQ_POLL: Duration = Duration::from_micros(200);

/// Pattern written to RF_CONTROL by the communication check
const COMM_CHECK_PATTERN: u32 = 0x05;

pub(crate) fn to_duration(d: MillisDurationU32) -> Duration {
    Duration::from_millis(d.to_millis().into())
}

enum Wait {
    Done,
    Failed,
    Expired,
}

/// IRQ_STATUS value with the flags set by `f`, for write-1-to-clear
pub(crate) fn irq(f: impl FnOnce(&mut IrqStatus)) -> IrqStatus {
    let mut irq = IrqStatus::default();
    f(&mut irq);
    irq
}

/// Chip level operations on top of an [`Interface`]
///
/// Every method is a short sequence of register accesses; none of them keep
/// the bus locked between accesses.
pub struct Device<I, R> {
    iface: I,
    reset: Mutex<R>,
    config: Config,
    protocols: ProtocolTable,
    /// Product and firmware versions read at bring up
    version: (u32, u32),
    epoch: Instant,
}

impl<I, R> Device<I, R> {
    pub fn version(&self) -> (u32, u32) {
        self.version
    }
}

impl<I: Interface, R: OutputPin> Device<I, R> {
    pub fn new(iface: I, reset: R, config: Config) -> Self {
        Self {
            iface,
            reset: Mutex::new(reset),
            protocols: ProtocolTable::new(&config.rf),
            config,
            version: (0, 0),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn protocol_config(&self, protocol: Protocol) -> &ProtocolConfig {
        self.protocols.get(protocol)
    }

    /// Time since the device was created
    pub fn uptime(&self) -> MillisDurationU64 {
        let ms = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        MillisDurationU64::millis(ms)
    }

    /// Product and firmware versions, `(0, 0)` when they could not be read
    /// Reset, verify and program the chip
    pub fn bring_up(&mut self) -> Result<()> {
        self.hardware_reset()?;
        self.check_communication()?;
        match self.read_version() {
            Ok((product, firmware)) => {
                log::info!("PN5180 product {product:#06X}, firmware {firmware:#06X}");
                self.version = (product, firmware);
            }
            Err(e) => log::warn!("Could not read versions from EEPROM ({e}), using defaults"),
        }
        self.configure_defaults()
    }

    /// Product and firmware versions from EEPROM
    pub fn read_version(&self) -> Result<(u32, u32)> {
        let mut raw = [0u8; 4];
        self.iface
            .read_eeprom(registers::eeprom::PRODUCT_VERSION, &mut raw)?;
        let product = u16::from_le_bytes([raw[0], raw[1]]);
        let firmware = u16::from_le_bytes([raw[2], raw[3]]);
        Ok((product.into(), firmware.into()))
    }

    /// Pulse the reset line and wait for the chip to settle
    pub fn hardware_reset(&self) -> Result<()> {
        log::debug!("Pulsing reset line");
        {
            let mut reset = self
                .reset
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            reset.set_low().map_err(|_| Error::Bus)?;
            thread::sleep(to_duration(self.config.timing.reset_pulse));
            reset.set_high().map_err(|_| Error::Bus)?;
        }
        thread::sleep(to_duration(self.config.timing.settle_delay));
        Ok(())
    }

    /// Round trip a pattern through RF_CONTROL
    pub fn check_communication(&self) -> Result<()> {
        let original = self.iface.read_register(registers::RF_CONTROL)?;
        self.iface
            .write_register(registers::RF_CONTROL, COMM_CHECK_PATTERN)?;
        let readback = self.iface.read_register(registers::RF_CONTROL)?;
        self.iface.write_register(registers::RF_CONTROL, original)?;
        if readback & RfControl::STABLE_MASK != COMM_CHECK_PATTERN {
            log::error!(
                "Communication check failed: wrote {COMM_CHECK_PATTERN:#04X}, read {readback:#010X}"
            );
            return Err(Error::HardwareFault);
        }
        log::debug!("Communication check passed");
        Ok(())
    }

    /// Program every register the driver relies on, RF field off
    pub fn configure_defaults(&self) -> Result<()> {
        let rf = &self.config.rf;
        SystemConfig::default().write(&self.iface)?;
        IrqEnable::default().write(&self.iface)?;
        self.iface
            .write_register(registers::IRQ_STATUS, IrqStatus::ALL)?;

        let mut fifo = FifoControl::default();
        fifo.set_tx_reset(true);
        fifo.set_rx_reset(true);
        fifo.set_enable(true);
        fifo.write(&self.iface)?;

        self.write_receiver_config(rf.rx_gain)?;

        let [tuning_msb, tuning_lsb] = rf.antenna_tuning.to_be_bytes();
        self.iface
            .write_register(registers::ANTENNA_TUNING_LSB, tuning_lsb.into())?;
        self.iface
            .write_register(registers::ANTENNA_TUNING_MSB, tuning_msb.into())?;

        let mut crc = CrcConfig::default();
        crc.set_tx_enable(rf.crc_enabled);
        crc.set_rx_enable(rf.crc_enabled);
        crc.write(&self.iface)?;

        RfControl::modify(&self.iface, |rf| rf.set_field_on(false))?;
        log::debug!("Default configuration written");
        Ok(())
    }

    fn write_receiver_config(&self, gain: u8) -> Result<()> {
        let rf = &self.config.rf;
        let mut conf1 = RxConf1::default();
        conf1.set_gain(u3::new(gain & 0x07));
        conf1.set_bandwidth(rx_conf1::Bandwidth::Mhz1_8);
        conf1.write(&self.iface)?;

        let mut conf3 = RxConf3::default();
        conf3.set_iq_threshold(u3::new(rf.iq_threshold & 0x07));
        conf3.set_min_mod_depth(u4::new(rf.modulation_depth & 0x0F));
        conf3.write(&self.iface)
    }

    pub fn rf_field(&self, on: bool) -> Result<()> {
        log::trace!("RF field {}", if on { "on" } else { "off" });
        RfControl::modify(&self.iface, |rf| rf.set_field_on(on))
    }

    pub fn field_is_on(&self) -> Result<bool> {
        Ok(RfControl::read(&self.iface)?.field_on())
    }

    /// Field on, IRQs cleared and the transceive sources armed
    pub fn configure_for_scanning(&self) -> Result<()> {
        self.rf_field(true)?;
        self.iface
            .write_register(registers::IRQ_STATUS, IrqStatus::ALL)?;
        let mut enable = IrqEnable::default();
        enable.set_tx_done(true);
        enable.set_rx_done(true);
        enable.set_rx_error(true);
        enable.set_tx_error(true);
        enable.write(&self.iface)?;

        if !Status::read(&self.iface)?.rf_field() {
            log::error!("RF field did not come up");
            return Err(Error::RfField);
        }
        Ok(())
    }

    /// Program bitrate, modulation, TX power, receiver and CRC for `protocol`
    pub fn switch_protocol(&self, protocol: Protocol) -> Result<()> {
        let entry = self.protocols.get(protocol);
        log::trace!("Switching to {protocol}");
        entry.tx_conf.write(&self.iface)?;
        self.iface.write_register(
            entry.tx_driver_reg,
            u32::from(entry.tx_power) & registers::TX_DRIVER_STRENGTH_MASK,
        )?;
        self.write_receiver_config(entry.rx_gain)?;
        CrcConfig::modify(&self.iface, |crc| crc.set_crc_type(entry.crc_type))
    }

    /// Load the detect command of `protocol` and start transmitting it
    pub fn send_detect(&self, protocol: Protocol) -> Result<()> {
        self.transmit(self.protocols.get(protocol).detect_command)
    }

    /// Clear stale transceive flags, fill the TX buffer and start the transmission
    pub fn transmit(&self, frame: &[u8]) -> Result<()> {
        self.clear_irq(irq(|irq| {
            irq.set_tx_done(true);
            irq.set_tx_error(true);
            irq.set_rx_done(true);
            irq.set_rx_error(true);
        }))?;
        self.iface.write_buffer(frame)?;
        let [lsb, msb] = u16::try_from(frame.len())
            .map_err(|_| Error::BufferOverflow)?
            .to_le_bytes();
        self.iface
            .write_register(registers::TX_LENGTH_LSB, lsb.into())?;
        self.iface
            .write_register(registers::TX_LENGTH_MSB, msb.into())
    }

    pub fn irq_status(&self) -> Result<IrqStatus> {
        IrqStatus::read(&self.iface)
    }

    /// Clear the flags set in `mask`
    pub fn clear_irq(&self, mask: IrqStatus) -> Result<()> {
        mask.write(&self.iface)
    }

    pub fn error_status(&self) -> Result<ErrorStatus> {
        ErrorStatus::read(&self.iface)
    }

    /// Map the latched RX error cause to a driver error
    pub fn rx_error_cause(&self) -> Result<Error> {
        let status = self.error_status()?;
        log::debug!("RX error: {status:?}");
        Ok(if status.collision() {
            Error::MultipleTagsPresent
        } else if status.crc() {
            Error::Crc
        } else {
            Error::Protocol
        })
    }

    /// Copy the received frame into `buf`, returning its length
    ///
    /// The length comes from the FIFO level, not from any earlier bookkeeping.
    pub fn read_response<'b>(&self, buf: &'b mut [u8]) -> Result<&'b [u8]> {
        let len = usize::from(FifoStatus::read(&self.iface)?.rx_level().value());
        if len == 0 {
            log::debug!("RX done with empty FIFO");
            return Err(Error::Protocol);
        }
        let dest = buf.get_mut(..len).ok_or(Error::BufferOverflow)?;
        self.iface.read_buffer(dest)?;
        log::trace!("Received {len} bytes: {dest:02X?}");
        Ok(dest)
    }

    pub fn rssi(&self) -> Result<u8> {
        Ok(RfStatus::read(&self.iface)?.rssi().value())
    }

    /// Validate a raw response according to `protocol`
    pub fn decode(&self, protocol: Protocol, raw: &[u8]) -> Result<CardRecord> {
        match protocol {
            Protocol::Iso14443A => nfc_a::parse_response(raw),
            Protocol::Iso14443B => nfc_b::parse_atqb(raw),
            Protocol::Iso15693 => iso15693::parse_inventory(raw),
        }
    }

    /// Stamp a freshly decoded record with RSSI and time
    pub fn finish_record(&self, mut record: CardRecord) -> CardRecord {
        record.timestamp = self.uptime();
        match self.rssi() {
            Ok(rssi) => record.rssi = rssi,
            Err(e) => log::debug!("RSSI unavailable: {e}"),
        }
        record
    }

    /// Field off, then power down
    pub fn enter_sleep(&self) -> Result<()> {
        self.rf_field(false)?;
        SystemConfig::modify(&self.iface, |sys| sys.set_power_down(true))?;
        log::info!("Entered power down");
        Ok(())
    }

    /// Leave power down; registers must be reprogrammed after the settle delay
    pub fn wake(&self) -> Result<()> {
        SystemConfig::modify(&self.iface, |sys| sys.set_power_down(false))?;
        log::info!("Left power down");
        Ok(())
    }

    pub fn soft_reset(&self) -> Result<()> {
        let mut sys = SystemConfig::default();
        sys.set_reset(true);
        sys.write(&self.iface)?;
        log::info!("Soft reset");
        Ok(())
    }

    /// Poll IRQ_STATUS until `done` or `failed` latches, or `deadline` passes
    fn wait_irq(
        &self,
        deadline: Instant,
        done: fn(&IrqStatus) -> bool,
        failed: fn(&IrqStatus) -> bool,
    ) -> Result<Wait> {
        loop {
            let status = self.irq_status()?;
            if done(&status) {
                return Ok(Wait::Done);
            }
            if failed(&status) {
                return Ok(Wait::Failed);
            }
            if Instant::now() >= deadline {
                return Ok(Wait::Expired);
            }
            thread::sleep(IRQ_POLL);
        }
    }

    /// One blocking detect cycle on `protocol`
    ///
    /// Leaves the RF field the way it found it.
    pub fn read_uid(&self, protocol: Protocol, timeout: MillisDurationU32) -> Result<CardRecord> {
        let start = Instant::now();
        let deadline = start + to_duration(timeout);
        let field_was_on = self.field_is_on()?;
        if !field_was_on {
            self.configure_for_scanning()?;
        }
        let res = self.read_uid_inner(protocol, start, deadline);
        if !field_was_on {
            if let Err(e) = self.rf_field(false) {
                log::warn!("Could not turn RF field off after read: {e}");
            }
        }
        res
    }

    fn read_uid_inner(
        &self,
        protocol: Protocol,
        start: Instant,
        deadline: Instant,
    ) -> Result<CardRecord> {
        self.switch_protocol(protocol)?;
        self.send_detect(protocol)?;

        let tx_deadline = deadline.min(start + to_duration(self.config.timing.tx_timeout));
        match self.wait_irq(tx_deadline, IrqStatus::tx_done, IrqStatus::tx_error)? {
            Wait::Done => self.clear_irq(irq(|irq| irq.set_tx_done(true)))?,
            Wait::Failed => {
                log::debug!("{protocol}: TX error");
                self.clear_irq(irq(|irq| irq.set_tx_error(true)))?;
                return Err(Error::Protocol);
            }
            Wait::Expired => {
                log::debug!("{protocol}: TX did not complete");
                return Err(Error::Timeout);
            }
        }

        // the reply window opens when the frame is out
        let data_timeout = self.protocols.get(protocol).data_timeout;
        let rx_deadline = deadline.min(Instant::now() + to_duration(data_timeout));
        match self.wait_irq(rx_deadline, IrqStatus::rx_done, IrqStatus::rx_error)? {
            Wait::Done => self.clear_irq(irq(|irq| irq.set_rx_done(true)))?,
            Wait::Failed => {
                let cause = self.rx_error_cause()?;
                self.clear_irq(irq(|irq| irq.set_rx_error(true)))?;
                return Err(cause);
            }
            Wait::Expired => return Err(Error::NoTagPresent),
        }

        let mut buf = [0u8; BUFFER_SIZE];
        let raw = self.read_response(&mut buf)?;
        let record = self.decode(protocol, raw)?;
        Ok(self.finish_record(record))
    }
}
