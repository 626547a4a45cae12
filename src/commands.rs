use std::sync::mpsc::SyncSender;

use fugit::MillisDurationU32;

use crate::{CardRecord, Protocol, ProtocolMask, Result};

/// Requests handed from the public API to the worker
///
/// Executed in FIFO order between two state machine steps.
#[derive(Debug)]
pub enum Command {
    /// Enable scanning for `protocols`; no effect if already scanning
    StartScan { protocols: ProtocolMask },
    /// Field off, back to idle; no effect if not scanning
    StopScan,
    /// One detect cycle on `protocol`, result sent through `reply`
    ReadUid {
        protocol: Protocol,
        timeout: MillisDurationU32,
        reply: SyncSender<Result<CardRecord>>,
    },
    /// Field off and power down, scanning disabled
    Sleep,
    /// Leave power down and reprogram the chip
    Wake,
    /// Soft reset followed by reconfiguration
    Reset,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartScan { .. } => "StartScan",
            Command::StopScan => "StopScan",
            Command::ReadUid { .. } => "ReadUid",
            Command::Sleep => "Sleep",
            Command::Wake => "Wake",
            Command::Reset => "Reset",
        }
    }
}
