use fugit::MillisDurationU32;

use crate::{Error, Result};

/// Analog front end settings, applied to every protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RfConfig {
    /// Receiver gain, 0 to 7 in 6 dB steps (0 to 42 dB)
    pub rx_gain: u8,
    /// TX driver strength, 0 to 15
    pub tx_power: u8,
    /// Minimum modulation depth, 0 to 15
    pub modulation_depth: u8,
    /// I/Q detection threshold, 0 to 7
    pub iq_threshold: u8,
    /// Antenna tuning capacitance, written to the tuning LSB/MSB registers
    pub antenna_tuning: u16,
    /// Let the chip append and check CRCs
    pub crc_enabled: bool,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            rx_gain: 7,
            tx_power: 0x0F,
            modulation_depth: 2,
            iq_threshold: 1,
            antenna_tuning: 0x0088,
            crc_enabled: true,
        }
    }
}

impl RfConfig {
    pub fn validate(&self) -> Result<()> {
        let in_range = self.rx_gain <= 7
            && self.tx_power <= 15
            && self.modulation_depth <= 15
            && self.iq_threshold <= 7;
        if in_range {
            Ok(())
        } else {
            log::error!("RF config out of range: {self:?}");
            Err(Error::InvalidArgument)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// Longest wait for BUSY to drop before a transfer
    pub busy_timeout: MillisDurationU32,
    /// Wait after reset or wake before touching registers
    pub settle_delay: MillisDurationU32,
    /// Wait in the error state before attempting recovery
    pub error_backoff: MillisDurationU32,
    /// Minimum spacing between two detect commands, start to start
    pub scan_cycle_delay: MillisDurationU32,
    /// Longest wait for TX done after a detect command
    pub tx_timeout: MillisDurationU32,
    /// Longest wait for room in the command queue
    pub enqueue_timeout: MillisDurationU32,
    /// Worker loop period
    pub tick: MillisDurationU32,
    /// Low time of the reset line
    pub reset_pulse: MillisDurationU32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            busy_timeout: MillisDurationU32::millis(100),
            settle_delay: MillisDurationU32::millis(50),
            error_backoff: MillisDurationU32::millis(1000),
            scan_cycle_delay: MillisDurationU32::millis(1),
            tx_timeout: MillisDurationU32::millis(100),
            enqueue_timeout: MillisDurationU32::millis(100),
            tick: MillisDurationU32::millis(1),
            reset_pulse: MillisDurationU32::millis(10),
        }
    }
}

impl Timing {
    pub fn validate(&self) -> Result<()> {
        let zero = MillisDurationU32::from_ticks(0);
        if [self.busy_timeout, self.tx_timeout, self.tick, self.reset_pulse].contains(&zero) {
            log::error!("Timing values must be non-zero: {self:?}");
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// Driver configuration, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub rf: RfConfig,
    pub timing: Timing,
    /// Capacity of the command queue
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rf: RfConfig::default(),
            timing: Timing::default(),
            queue_depth: 10,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.rf.validate()?;
        self.timing.validate()?;
        if self.queue_depth == 0 {
            log::error!("Command queue depth must be non-zero");
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.rf.rx_gain, 7);
        assert_eq!(config.rf.antenna_tuning, 0x0088);
        assert_eq!(config.timing.error_backoff, MillisDurationU32::millis(1000));
        assert_eq!(config.queue_depth, 10);
    }

    #[test]
    fn out_of_range_rejected() {
        let bad_rf = [
            RfConfig { rx_gain: 8, ..Default::default() },
            RfConfig { tx_power: 16, ..Default::default() },
            RfConfig { modulation_depth: 16, ..Default::default() },
            RfConfig { iq_threshold: 8, ..Default::default() },
        ];
        for rf in bad_rf {
            let config = Config { rf, ..Default::default() };
            assert_eq!(config.validate(), Err(Error::InvalidArgument), "{rf:?}");
        }

        let config = Config { queue_depth: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(Error::InvalidArgument));

        let timing = Timing { busy_timeout: MillisDurationU32::millis(0), ..Default::default() };
        let config = Config { timing, ..Default::default() };
        assert_eq!(config.validate(), Err(Error::InvalidArgument));
    }
}
