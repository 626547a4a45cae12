use std::{
    sync::{
        atomic::Ordering,
        mpsc::{sync_channel, SyncSender, TrySendError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use embedded_hal::digital::OutputPin;
use fugit::MillisDurationU32;

use crate::{
    card::UidString,
    commands::Command,
    device::{to_duration, Device},
    state_machine::{Machine, Shared, State, Statistics},
    CardRecord, Config, Error, Interface, Protocol, ProtocolMask, Result,
};

/// Poll period while the command queue is full
const ENQUEUE_POLL: Duration = Duration::from_millis(1);

/// Handle to a PN5180 and the worker thread driving it
///
/// Dropping the handle stops the worker, which switches the RF field off and
/// powers the chip down.
pub struct Pn5180<I, R> {
    device: Arc<Device<I, R>>,
    shared: Arc<Shared>,
    commands: SyncSender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl<I, R> Pn5180<I, R>
where
    I: Interface + 'static,
    R: OutputPin + Send + 'static,
{
    /// Validate `config`, bring the chip up and start the worker
    pub fn new(interface: I, reset: R, config: Config) -> Result<Self> {
        config.validate()?;
        let mut device = Device::new(interface, reset, config);
        device.bring_up()?;
        let device = Arc::new(device);

        let shared = Arc::new(Shared::new());
        let machine = Machine::new(device.clone(), shared.clone());
        let (commands, queue) = sync_channel(config.queue_depth);
        let worker = thread::Builder::new()
            .name("pn5180".into())
            .spawn(move || machine.run(queue))
            .map_err(|e| {
                log::error!("Could not spawn worker: {e}");
                Error::HardwareFault
            })?;
        log::info!("PN5180 ready");

        Ok(Self {
            device,
            shared,
            commands,
            worker: Some(worker),
        })
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        let name = command.name();
        let deadline = Instant::now() + to_duration(self.device.config().timing.enqueue_timeout);
        let mut command = command;
        loop {
            match self.commands.try_send(command) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) if Instant::now() < deadline => {
                    command = back;
                    thread::sleep(ENQUEUE_POLL);
                }
                Err(TrySendError::Full(_)) => {
                    log::warn!("Command queue full, dropping {name}");
                    return Err(Error::Timeout);
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::error!("Worker gone, dropping {name}");
                    return Err(Error::NotInitialized);
                }
            }
        }
    }

    /// Scan for `protocols`, handing every detected card to `on_card`
    ///
    /// `on_card` runs on the worker thread and must not block. If scanning is
    /// already on, only the handler is replaced.
    pub fn start_scanning<F>(&self, protocols: ProtocolMask, on_card: F) -> Result<()>
    where
        F: FnMut(CardRecord) + Send + 'static,
    {
        let protocols = ProtocolMask::from_raw(protocols.bits()).ok_or_else(|| {
            log::warn!("Rejecting protocol mask {:#05b}", protocols.bits());
            Error::InvalidArgument
        })?;
        self.shared.handlers.set_card(Box::new(on_card));
        self.enqueue(Command::StartScan { protocols })
    }

    pub fn stop_scanning(&self) -> Result<()> {
        self.enqueue(Command::StopScan)
    }

    /// One blocking detect cycle on the calling thread
    ///
    /// Only allowed while idle or scanning. The bus is shared with the worker
    /// one register access at a time.
    pub fn read_uid(&self, protocol: Protocol, timeout: MillisDurationU32) -> Result<CardRecord> {
        if timeout.ticks() == 0 {
            return Err(Error::InvalidArgument);
        }
        let state = self.state();
        if state != State::Idle && !state.is_scanning() {
            log::debug!("ReadUid refused in {state:?}");
            return Err(Error::DeviceBusy);
        }
        let card = self.device.read_uid(protocol, timeout)?;
        self.shared.set_last_uid(card.uid.to_hex_string());
        Ok(card)
    }

    /// One detect cycle run by the worker; blocks until it replies
    pub fn request_uid(
        &self,
        protocol: Protocol,
        timeout: MillisDurationU32,
    ) -> Result<CardRecord> {
        if timeout.ticks() == 0 {
            return Err(Error::InvalidArgument);
        }
        let (reply, result) = sync_channel(1);
        self.enqueue(Command::ReadUid {
            protocol,
            timeout,
            reply,
        })?;
        result.recv().map_err(|_| Error::NotInitialized)?
    }

    pub fn sleep(&self) -> Result<()> {
        self.enqueue(Command::Sleep)
    }

    pub fn wake(&self) -> Result<()> {
        self.enqueue(Command::Wake)
    }

    pub fn soft_reset(&self) -> Result<()> {
        self.enqueue(Command::Reset)
    }

    /// Install the sink for faults the worker runs into
    pub fn set_error_handler<F>(&self, on_error: F)
    where
        F: FnMut(Error) + Send + 'static,
    {
        self.shared.handlers.set_error(Box::new(on_error));
    }
}

impl<I, R> Pn5180<I, R> {
    pub fn state(&self) -> State {
        self.shared.status().state
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.status().scanning
    }

    /// Protocols being scanned for, empty when not scanning
    pub fn enabled_protocols(&self) -> ProtocolMask {
        let status = self.shared.status();
        if status.scanning {
            status.protocols
        } else {
            ProtocolMask::empty()
        }
    }

    /// Anything other than sitting idle
    pub fn is_busy(&self) -> bool {
        self.state() != State::Idle
    }

    pub fn statistics(&self) -> Statistics {
        self.shared.stats.snapshot()
    }

    /// UID of the last detected card, as colon separated hex
    pub fn last_uid(&self) -> Option<UidString> {
        self.shared.last_uid()
    }

    /// Product and firmware versions read from EEPROM at bring up
    ///
    /// `(0, 0)` when the EEPROM could not be read.
    pub fn version(&self) -> (u32, u32) {
        self.device.version()
    }
}

impl<I, R> Drop for Pn5180<I, R> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Worker panicked");
            }
        }
    }
}
