use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc::{Receiver, TryRecvError},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::Instant,
};

use embedded_hal::digital::OutputPin;

use crate::{
    card::UidString,
    commands::Command,
    device::{irq, to_duration, Device},
    events::Handlers,
    interface::BUFFER_SIZE,
    Error, Interface, Protocol, ProtocolMask, Result,
};

/// Lifecycle of the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Uninitialized,
    /// Waiting for the chip to settle before programming defaults
    Resetting,
    Idle,
    /// Field on, IRQs armed
    Configuring,
    /// Choosing and dispatching the next protocol attempt
    Scanning,
    /// Waiting for TX done
    Transmitting,
    /// Waiting for RX done within the protocol's deadline
    Receiving,
    /// Validating the received frame
    Processing,
    /// Backing off before a reset
    Error,
    Sleep,
    WakingUp,
}

impl State {
    /// States that belong to an active scan cycle
    pub fn is_scanning(self) -> bool {
        matches!(
            self,
            State::Configuring
                | State::Scanning
                | State::Transmitting
                | State::Receiving
                | State::Processing
        )
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    /// Detect commands dispatched
    pub total_scans: u32,
    pub cards_detected: u32,
    pub crc_errors: u32,
    /// TX timeouts and bus timeouts during scan cycles
    pub timeout_errors: u32,
    /// Malformed or rejected responses
    pub protocol_errors: u32,
    /// Entries into the error state
    pub error_recoveries: u32,
}

#[derive(Default)]
pub(crate) struct Counters {
    total_scans: AtomicU32,
    cards_detected: AtomicU32,
    crc_errors: AtomicU32,
    timeout_errors: AtomicU32,
    protocol_errors: AtomicU32,
    error_recoveries: AtomicU32,
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn snapshot(&self) -> Statistics {
        let load = |c: &AtomicU32| c.load(Ordering::Relaxed);
        Statistics {
            total_scans: load(&self.total_scans),
            cards_detected: load(&self.cards_detected),
            crc_errors: load(&self.crc_errors),
            timeout_errors: load(&self.timeout_errors),
            protocol_errors: load(&self.protocol_errors),
            error_recoveries: load(&self.error_recoveries),
        }
    }

    /// Count a failed protocol attempt
    fn record(&self, error: Error) {
        match error {
            Error::Crc => bump(&self.crc_errors),
            Error::Timeout => bump(&self.timeout_errors),
            Error::Protocol | Error::MultipleTagsPresent => bump(&self.protocol_errors),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Status {
    pub state: State,
    pub scanning: bool,
    pub protocols: ProtocolMask,
}

/// State shared between the worker and the handle
pub(crate) struct Shared {
    status: Mutex<Status>,
    pub stats: Counters,
    last_uid: Mutex<Option<UidString>>,
    pub handlers: Handlers,
    pub shutdown: AtomicBool,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(Status {
                state: State::Uninitialized,
                scanning: false,
                protocols: ProtocolMask::empty(),
            }),
            stats: Counters::default(),
            last_uid: Mutex::new(None),
            handlers: Handlers::default(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> Status {
        *self.lock()
    }

    pub fn last_uid(&self) -> Option<UidString> {
        self.last_uid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_last_uid(&self, uid: UidString) {
        *self
            .last_uid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(uid);
    }
}

/// Detection state machine, owned by the worker thread
pub(crate) struct Machine<I, R> {
    device: Arc<Device<I, R>>,
    shared: Arc<Shared>,
    /// Position in [`Protocol::ALL`] of the next attempt
    index: usize,
    /// Protocol of the attempt in flight
    current: Protocol,
    /// When the current state was entered
    entered: Instant,
    /// Start of the last dispatched attempt
    last_scan: Option<Instant>,
    rx_deadline: Instant,
}

impl<I: Interface, R: OutputPin> Machine<I, R> {
    /// Machine for a freshly brought up chip, starting in [`State::Resetting`]
    pub fn new(device: Arc<Device<I, R>>, shared: Arc<Shared>) -> Self {
        let now = Instant::now();
        shared.lock().state = State::Resetting;
        Self {
            device,
            shared,
            index: 0,
            current: Protocol::Iso14443A,
            entered: now,
            last_scan: None,
            rx_deadline: now,
        }
    }

    pub fn state(&self) -> State {
        self.shared.status().state
    }

    fn set_state(&mut self, state: State) {
        let mut status = self.shared.lock();
        if status.state != state {
            log::debug!("{:?} -> {:?}", status.state, state);
            status.state = state;
        }
        self.entered = Instant::now();
    }

    fn scanning(&self) -> bool {
        self.shared.status().scanning
    }

    fn idle_or_configuring(&self) -> State {
        if self.scanning() {
            State::Configuring
        } else {
            State::Idle
        }
    }

    /// Control register failure: count it, report it and back off
    fn enter_error(&mut self, error: Error) {
        log::error!("Entering error state: {error}");
        self.set_state(State::Error);
        bump(&self.shared.stats.error_recoveries);
        self.shared.handlers.error(error);
    }

    /// Move on to the next protocol after a finished or failed attempt
    fn advance(&mut self) {
        self.index = (self.current.index() + 1) % Protocol::ALL.len();
        self.set_state(State::Scanning);
    }

    /// Worker loop: one command, one step, sleep to the next tick
    pub fn run(mut self, commands: Receiver<Command>) {
        let tick = to_duration(self.device.config().timing.tick);
        let mut next = Instant::now();
        log::info!("Worker started");
        while !self.shared.shutdown.load(Ordering::Acquire) {
            match commands.try_recv() {
                Ok(command) => self.dispatch(command),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }
            self.step();

            next += tick;
            let now = Instant::now();
            match next.checked_duration_since(now) {
                Some(wait) => thread::sleep(wait),
                None => next = now,
            }
        }
        self.power_down();
        log::info!("Worker stopped");
    }

    fn power_down(&mut self) {
        if let Err(e) = self.device.rf_field(false) {
            log::warn!("Could not turn RF field off on shutdown: {e}");
        }
        if let Err(e) = self.device.enter_sleep() {
            log::warn!("Could not power down on shutdown: {e}");
        }
    }

    /// Execute one command, reporting failures to the error handler
    pub fn dispatch(&mut self, command: Command) {
        let name = command.name();
        log::debug!("Command {name}");
        match command {
            Command::ReadUid {
                protocol,
                timeout,
                reply,
            } => {
                let res = self.read_uid(protocol, timeout);
                if reply.send(res).is_err() {
                    log::debug!("ReadUid caller went away");
                }
            }
            command => {
                if let Err(e) = self.handle(command) {
                    log::warn!("Command {name} failed: {e}");
                    self.shared.handlers.error(e);
                }
            }
        }
    }

    fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::StartScan { protocols } => self.start_scan(protocols),
            Command::StopScan => self.stop_scan(),
            Command::Sleep => self.sleep(),
            Command::Wake => self.wake(),
            Command::Reset => self.reset(),
            Command::ReadUid { .. } => Err(Error::Unsupported),
        }
    }

    fn start_scan(&mut self, protocols: ProtocolMask) -> Result<()> {
        let state = {
            let mut status = self.shared.lock();
            if matches!(status.state, State::Sleep | State::WakingUp) {
                return Err(Error::DeviceBusy);
            }
            if status.scanning {
                log::debug!("Already scanning");
                return Ok(());
            }
            status.scanning = true;
            status.protocols = protocols;
            status.state
        };
        log::info!("Scanning started for {protocols:?}");
        self.index = 0;
        self.last_scan = None;
        // resetting and error states pick the flag up when they finish
        if state == State::Idle {
            self.set_state(State::Configuring);
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<()> {
        let state = {
            let mut status = self.shared.lock();
            if !status.scanning {
                return Ok(());
            }
            status.scanning = false;
            status.state
        };
        log::info!("Scanning stopped");
        if state.is_scanning() {
            self.set_state(State::Idle);
        }
        // resetting and error states keep their recovery, minus the field
        match self.device.rf_field(false) {
            Ok(()) => Ok(()),
            Err(e) if state == State::Error => {
                log::warn!("Could not turn RF field off: {e}");
                Err(e)
            }
            Err(e) => {
                self.enter_error(e);
                Err(e)
            }
        }
    }

    fn sleep(&mut self) -> Result<()> {
        match self.state() {
            State::Sleep => return Ok(()),
            State::Idle => {}
            state if state.is_scanning() => {}
            _ => return Err(Error::DeviceBusy),
        }
        self.shared.lock().scanning = false;
        match self.device.enter_sleep() {
            Ok(()) => {
                self.set_state(State::Sleep);
                Ok(())
            }
            Err(e) => {
                self.enter_error(e);
                Err(e)
            }
        }
    }

    fn wake(&mut self) -> Result<()> {
        if self.state() != State::Sleep {
            return Ok(());
        }
        match self.device.wake() {
            Ok(()) => {
                self.set_state(State::WakingUp);
                Ok(())
            }
            Err(e) => {
                self.enter_error(e);
                Err(e)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        if let Err(e) = self.device.soft_reset() {
            log::warn!("Soft reset failed ({e}), pulsing reset line");
            if let Err(e) = self.device.hardware_reset() {
                self.enter_error(e);
                return Err(e);
            }
        }
        self.set_state(State::Resetting);
        Ok(())
    }

    fn read_uid(
        &mut self,
        protocol: Protocol,
        timeout: fugit::MillisDurationU32,
    ) -> Result<crate::CardRecord> {
        match self.state() {
            State::Idle => {}
            State::Transmitting | State::Receiving | State::Processing => {
                log::debug!("Abandoning {} attempt for ReadUid", self.current);
                self.advance();
            }
            state if state.is_scanning() => {}
            _ => return Err(Error::DeviceBusy),
        }
        let card = self.device.read_uid(protocol, timeout)?;
        self.shared.set_last_uid(card.uid.to_hex_string());
        Ok(card)
    }

    /// Do the work of the current state
    pub fn step(&mut self) {
        match self.state() {
            State::Uninitialized | State::Idle | State::Sleep => {}
            State::Resetting => self.step_resetting(),
            State::Configuring => self.step_configuring(),
            State::Scanning => self.step_scanning(),
            State::Transmitting => self.step_transmitting(),
            State::Receiving => self.step_receiving(),
            State::Processing => self.step_processing(),
            State::Error => self.step_error(),
            State::WakingUp => self.step_waking_up(),
        }
    }

    fn settled(&self) -> bool {
        self.entered.elapsed() >= to_duration(self.device.config().timing.settle_delay)
    }

    fn step_resetting(&mut self) {
        if !self.settled() {
            return;
        }
        match self.device.configure_defaults() {
            Ok(()) => {
                let next = self.idle_or_configuring();
                self.set_state(next);
            }
            Err(e) => self.enter_error(e),
        }
    }

    fn step_waking_up(&mut self) {
        if !self.settled() {
            return;
        }
        match self.device.configure_defaults() {
            Ok(()) => self.set_state(State::Idle),
            Err(e) => self.enter_error(e),
        }
    }

    fn step_configuring(&mut self) {
        match self.device.configure_for_scanning() {
            Ok(()) => {
                self.index = 0;
                self.set_state(State::Scanning);
            }
            Err(e) => self.enter_error(e),
        }
    }

    fn stop_field_and_idle(&mut self) {
        self.set_state(State::Idle);
        if let Err(e) = self.device.rf_field(false) {
            self.enter_error(e);
        }
    }

    fn step_scanning(&mut self) {
        let status = self.shared.status();
        if !status.scanning {
            self.stop_field_and_idle();
            return;
        }
        let cycle = to_duration(self.device.config().timing.scan_cycle_delay);
        if self.last_scan.is_some_and(|last| last.elapsed() < cycle) {
            return;
        }
        let Some((index, protocol)) = status.protocols.next_from(self.index) else {
            log::debug!("No protocol enabled");
            self.shared.lock().scanning = false;
            self.stop_field_and_idle();
            return;
        };
        self.index = index;
        self.current = protocol;
        self.last_scan = Some(Instant::now());
        bump(&self.shared.stats.total_scans);

        let dispatched = self
            .device
            .switch_protocol(protocol)
            .and_then(|()| self.device.send_detect(protocol));
        match dispatched {
            Ok(()) => self.set_state(State::Transmitting),
            Err(e) => {
                log::warn!("{protocol}: detect dispatch failed: {e}");
                self.shared.stats.record(e);
                self.advance();
            }
        }
    }

    fn step_transmitting(&mut self) {
        let irq_status = match self.device.irq_status() {
            Ok(status) => status,
            Err(e) => return self.enter_error(e),
        };
        if irq_status.tx_done() {
            if let Err(e) = self.device.clear_irq(irq(|irq| irq.set_tx_done(true))) {
                return self.enter_error(e);
            }
            let timeout = self.device.protocol_config(self.current).detect_timeout;
            self.rx_deadline = Instant::now() + to_duration(timeout);
            self.set_state(State::Receiving);
        } else if irq_status.tx_error() {
            log::debug!("{}: TX error", self.current);
            if let Err(e) = self.device.clear_irq(irq(|irq| irq.set_tx_error(true))) {
                return self.enter_error(e);
            }
            self.advance();
        } else if self.entered.elapsed() >= to_duration(self.device.config().timing.tx_timeout) {
            log::warn!("{}: TX timeout", self.current);
            bump(&self.shared.stats.timeout_errors);
            self.advance();
        }
    }

    fn step_receiving(&mut self) {
        let irq_status = match self.device.irq_status() {
            Ok(status) => status,
            Err(e) => return self.enter_error(e),
        };
        if irq_status.rx_done() {
            if let Err(e) = self.device.clear_irq(irq(|irq| irq.set_rx_done(true))) {
                return self.enter_error(e);
            }
            self.set_state(State::Processing);
        } else if irq_status.rx_error() {
            let cause = match self.device.rx_error_cause() {
                Ok(cause) => cause,
                Err(e) => return self.enter_error(e),
            };
            log::debug!("{}: RX error, {cause}", self.current);
            self.shared.stats.record(cause);
            if let Err(e) = self.device.clear_irq(irq(|irq| irq.set_rx_error(true))) {
                return self.enter_error(e);
            }
            self.advance();
        } else if Instant::now() >= self.rx_deadline {
            log::trace!("{}: no tag", self.current);
            self.advance();
        }
    }

    fn step_processing(&mut self) {
        let protocol = self.current;
        let mut buf = [0u8; BUFFER_SIZE];
        let card = self
            .device
            .read_response(&mut buf)
            .and_then(|raw| self.device.decode(protocol, raw));
        match card {
            Ok(card) => {
                let card = self.device.finish_record(card);
                log::info!("{protocol} card {}", card.uid);
                bump(&self.shared.stats.cards_detected);
                self.shared.set_last_uid(card.uid.to_hex_string());
                self.shared.handlers.card(card);
            }
            Err(e) => {
                log::debug!("{protocol}: response rejected: {e}");
                self.shared.stats.record(e);
            }
        }
        self.advance();
    }

    fn step_error(&mut self) {
        if self.entered.elapsed() < to_duration(self.device.config().timing.error_backoff) {
            return;
        }
        log::info!("Attempting error recovery");
        if let Err(e) = self.device.soft_reset() {
            log::warn!("Soft reset failed ({e}), pulsing reset line");
            if let Err(e) = self.device.hardware_reset() {
                log::error!("Reset line pulse failed: {e}");
                // fresh backoff
                self.set_state(State::Error);
                return;
            }
        }
        self.set_state(State::Resetting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{small_config, FakeChip, Reply, ResetLine};
    use fugit::MillisDurationU32;
    use std::{sync::mpsc::sync_channel, time::Duration};

    type TestMachine = Machine<FakeChip, ResetLine>;

    fn machine(chip: &FakeChip) -> TestMachine {
        machine_with(chip, small_config())
    }

    fn machine_with(chip: &FakeChip, config: crate::Config) -> TestMachine {
        let device = Device::new(chip.clone(), ResetLine::new(chip), config);
        Machine::new(Arc::new(device), Arc::new(Shared::new()))
    }

    fn step_until(m: &mut TestMachine, cond: impl Fn(&TestMachine) -> bool) -> bool {
        for _ in 0..2000 {
            if cond(&*m) {
                return true;
            }
            m.step();
            thread::sleep(Duration::from_micros(200));
        }
        cond(&*m)
    }

    fn scanning(chip: &FakeChip, protocols: ProtocolMask) -> TestMachine {
        scanning_with(chip, protocols, small_config())
    }

    fn scanning_with(chip: &FakeChip, protocols: ProtocolMask, config: crate::Config) -> TestMachine {
        let mut m = machine_with(chip, config);
        assert!(step_until(&mut m, |m| m.state() == State::Idle));
        m.dispatch(Command::StartScan { protocols });
        assert_eq!(m.state(), State::Configuring);
        m
    }

    #[test]
    fn starts_in_resetting() {
        let chip = FakeChip::new();
        let mut m = machine(&chip);
        assert_eq!(m.state(), State::Resetting);
        assert!(step_until(&mut m, |m| m.state() == State::Idle));
        // nothing happens while idle
        m.step();
        assert_eq!(m.state(), State::Idle);
        assert!(chip.transmitted().is_empty());
    }

    #[test]
    fn scan_flag_picked_up_after_reset() {
        let chip = FakeChip::new();
        let mut m = machine(&chip);
        m.dispatch(Command::StartScan {
            protocols: ProtocolMask::ISO14443A,
        });
        assert_eq!(m.state(), State::Resetting);
        assert!(step_until(&mut m, |m| m.state() == State::Configuring));
    }

    #[test]
    fn detect_cycle_states() {
        let chip = FakeChip::new();
        chip.respond(&[0x26], Reply::Frame(vec![0x04, 0x00, 0x08, 0xDE, 0xAD, 0xBE, 0xEF]));
        let mut m = scanning(&chip, ProtocolMask::ISO14443A);

        m.step();
        assert_eq!(m.state(), State::Scanning);
        m.step();
        assert_eq!(m.state(), State::Transmitting);
        m.step();
        assert_eq!(m.state(), State::Receiving);
        m.step();
        assert_eq!(m.state(), State::Processing);
        m.step();
        assert_eq!(m.state(), State::Scanning);

        let stats = m.shared.stats.snapshot();
        assert_eq!(stats.total_scans, 1);
        assert_eq!(stats.cards_detected, 1);
        assert_eq!(m.shared.last_uid().unwrap().as_str(), "DE:AD:BE:EF");
    }

    #[test]
    fn tx_error_moves_on() {
        let chip = FakeChip::new();
        chip.respond_default(Reply::TxError);
        let mut m = scanning(&chip, ProtocolMask::ISO14443A);
        m.step();
        m.step();
        assert_eq!(m.state(), State::Transmitting);
        m.step();
        assert_eq!(m.state(), State::Scanning);
        assert_eq!(chip.transmitted().len(), 1);
        assert_eq!(m.shared.stats.snapshot().total_scans, 1);
        assert!(step_until(&mut m, |_| chip.transmitted().len() == 2));
        assert_eq!(m.shared.stats.snapshot().cards_detected, 0);
    }

    #[test]
    fn stop_while_receiving() {
        let chip = FakeChip::new();
        let mut m = scanning(&chip, ProtocolMask::ISO15693);
        assert!(step_until(&mut m, |m| m.state() == State::Receiving));
        assert!(chip.field_on());

        m.dispatch(Command::StopScan);
        assert_eq!(m.state(), State::Idle);
        assert!(!chip.field_on());
        assert!(!m.shared.status().scanning);
        m.step();
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn stop_in_error_turns_field_off() {
        let chip = FakeChip::new();
        let mut m = scanning(&chip, ProtocolMask::ISO15693);
        assert!(step_until(&mut m, |m| m.state() == State::Receiving));

        chip.set_bus_fault(true);
        m.step();
        assert_eq!(m.state(), State::Error);
        chip.set_bus_fault(false);
        assert!(chip.field_on());

        m.dispatch(Command::StopScan);
        assert_eq!(m.state(), State::Error);
        assert!(!m.shared.status().scanning);
        assert!(!chip.field_on());
        // recovery still runs and ends idle
        assert!(step_until(&mut m, |m| m.state() == State::Idle));
        assert!(!chip.field_on());
    }

    #[test]
    fn cycle_delay_counts_from_dispatch() {
        let ms = MillisDurationU32::millis;
        let mut config = small_config();
        config.timing.scan_cycle_delay = ms(30);
        config.timing.tx_timeout = ms(25);
        let chip = FakeChip::new();
        chip.respond_default(Reply::Stuck);
        let mut m = scanning_with(&chip, ProtocolMask::ISO14443A, config);
        m.step();
        assert_eq!(m.state(), State::Scanning);

        let before = Instant::now();
        m.step();
        let dispatched = Instant::now();
        assert_eq!(m.state(), State::Transmitting);

        // attempt ends on the TX timeout, 25 ms after the dispatch
        assert!(step_until(&mut m, |m| m.state() == State::Scanning));
        let finished = Instant::now();
        assert!(finished >= before + Duration::from_millis(25));

        while Instant::now() < before + Duration::from_millis(29) {
            m.step();
            assert_eq!(chip.transmitted().len(), 1);
            thread::sleep(Duration::from_micros(200));
        }
        assert!(step_until(&mut m, |_| chip.transmitted().len() == 2));
        let second = Instant::now();
        // well before the 30 ms delay would have run out counted from the end
        assert!(second < finished + Duration::from_millis(25), "{:?}", second - dispatched);
    }

    #[test]
    fn read_uid_abandons_attempt_in_flight() {
        let chip = FakeChip::new();
        chip.respond(&[0x05, 0x00, 0x00], Reply::Stuck);
        chip.respond(&[0x26], Reply::Frame(vec![0x04, 0x00, 0x08, 0xDE, 0xAD, 0xBE, 0xEF]));
        let mut m = scanning(&chip, ProtocolMask::ISO14443B);
        assert!(step_until(&mut m, |m| m.state() == State::Transmitting));

        let (reply, result) = sync_channel(1);
        m.dispatch(Command::ReadUid {
            protocol: Protocol::Iso14443A,
            timeout: MillisDurationU32::millis(20),
            reply,
        });
        let card = result.recv().unwrap().unwrap();
        assert_eq!(card.uid.as_bytes(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(m.state(), State::Scanning);
        // scanning keeps the field on
        assert!(chip.field_on());
    }

    #[test]
    fn read_uid_refused_while_asleep() {
        let chip = FakeChip::new();
        let mut m = machine(&chip);
        assert!(step_until(&mut m, |m| m.state() == State::Idle));
        m.dispatch(Command::Sleep);
        assert_eq!(m.state(), State::Sleep);

        let (reply, result) = sync_channel(1);
        m.dispatch(Command::ReadUid {
            protocol: Protocol::Iso14443A,
            timeout: MillisDurationU32::millis(5),
            reply,
        });
        assert_eq!(result.recv().unwrap(), Err(Error::DeviceBusy));
        assert!(chip.transmitted().is_empty());
    }

    #[test]
    fn no_protocol_left_goes_idle() {
        let chip = FakeChip::new();
        let mut m = scanning(&chip, ProtocolMask::ISO14443A);
        m.shared.lock().protocols = ProtocolMask::empty();
        m.step();
        m.step();
        assert_eq!(m.state(), State::Idle);
        assert!(!m.shared.status().scanning);
        assert!(!chip.field_on());
    }

    #[test]
    fn error_state_falls_back_to_reset_line() {
        let chip = FakeChip::new();
        let mut m = scanning(&chip, ProtocolMask::ISO14443A);
        chip.set_bus_fault(true);
        m.step();
        assert_eq!(m.state(), State::Error);
        let pulses = chip.reset_pulses();

        // backoff, pulse, reprogramming fails again
        assert!(step_until(&mut m, |_| chip.reset_pulses() > pulses));
        assert!(step_until(&mut m, |m| m.state() == State::Error));
        assert_eq!(chip.soft_resets(), 0);
        assert!(m.shared.stats.snapshot().error_recoveries >= 2);

        chip.set_bus_fault(false);
        assert!(step_until(&mut m, |m| m.state() == State::Scanning));
        assert!(m.shared.status().scanning);
    }

    #[test]
    fn counters_by_cause() {
        let counters = Counters::default();
        counters.record(Error::Crc);
        counters.record(Error::Timeout);
        counters.record(Error::Protocol);
        counters.record(Error::MultipleTagsPresent);
        counters.record(Error::NoTagPresent);
        assert_eq!(
            counters.snapshot(),
            Statistics {
                crc_errors: 1,
                timeout_errors: 1,
                protocol_errors: 2,
                ..Statistics::default()
            }
        );
    }
}
