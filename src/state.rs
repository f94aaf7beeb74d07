//! Bookkeeping of the single decode engine shared by all sensors.
//!
//! Everything in here runs inside the engine's critical section, some of it in interrupt
//! context, so none of it may block, allocate or log.

use core::fmt;

use dht22::{DhtError, Microseconds, Reading, FRAME_EDGES};

use crate::config::Timing;
use crate::error::ReadError;
use crate::line::LineId;

/// Stage of the current read.
///
/// A read goes `ReadyForNext -> Collecting -> {Ok | ChecksumError | OtherError} -> ReadyForNext`.
/// A refused read goes `ReadyForNext -> {TooSoon | OtherError} -> ReadyForNext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Collecting,
    Ok,
    ChecksumError,
    OtherError,
    TooSoon,
    ReadyForNext,
}

/// Result of a finished read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Ok(Reading),
    ChecksumError,
    TooSoon,
    /// Nothing was collected when the read was finalized.
    NotRead,
    IoError,
}

/// The status line of a read session, without line terminator.
impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::Ok(reading) => write!(f, "Ok;{reading}"),
            ReadOutcome::ChecksumError => f.write_str("ChecksumError"),
            ReadOutcome::TooSoon => f.write_str("ReadTooSoon"),
            ReadOutcome::NotRead => f.write_str("NotRead"),
            ReadOutcome::IoError => f.write_str("IOError"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedDecodeState {
    active_line: Option<LineId>,
    phase: Phase,
    edge_count: usize,
    // [0] marks the start of the read, the sensor's handshake adds two edges and each bit one
    timestamps: [Microseconds; FRAME_EDGES],
    bytes: [u8; 5],
    // Line and final edge of the last successful read
    last_completed: Option<(LineId, Microseconds)>,
    reading: Reading,
}

impl Default for SharedDecodeState {
    fn default() -> Self {
        Self {
            active_line: None,
            phase: Phase::ReadyForNext,
            edge_count: 0,
            timestamps: [Microseconds::default(); FRAME_EDGES],
            bytes: [0; 5],
            last_completed: None,
            reading: Reading::default(),
        }
    }
}

impl SharedDecodeState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_line(&self) -> Option<LineId> {
        self.active_line
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn timestamps(&self) -> &[Microseconds] {
        &self.timestamps[..self.edge_count]
    }

    pub fn bytes(&self) -> [u8; 5] {
        self.bytes
    }

    pub fn last_completed_at(&self) -> Option<Microseconds> {
        self.last_completed.map(|(_, at)| at)
    }

    /// The line of the last successful read.
    pub fn last_completed_line(&self) -> Option<LineId> {
        self.last_completed.map(|(line, _)| line)
    }

    /// Claim the engine for a read of `line`, which is `None` if the sensor is not configured.
    ///
    /// A busy engine is not touched. Other rejections leave their terminal phase behind,
    /// which the rejected caller has to clear with [`finish`](Self::finish).
    pub fn arm(
        &mut self,
        sensor: usize,
        line: Option<LineId>,
        now: Microseconds,
        timing: &Timing,
    ) -> Result<LineId, ReadError> {
        if self.phase != Phase::ReadyForNext {
            return Err(ReadError::Busy);
        }
        let Some(line) = line else {
            self.phase = Phase::OtherError;
            return Err(ReadError::NotConfigured { sensor });
        };
        if let Some((completed_line, completed)) = self.last_completed {
            // The clock wraps after about 71 minutes, a read that lands in the first
            // refractory interval of a later lap is refused once more
            let elapsed_ms = now.since(completed).as_millis();
            if completed_line == line && elapsed_ms < timing.refractory_ms {
                self.phase = Phase::TooSoon;
                return Err(ReadError::TooSoon { elapsed_ms });
            }
        }
        self.active_line = Some(line);
        self.phase = Phase::Collecting;
        self.reading = Reading::default();
        self.bytes = [0; 5];
        self.timestamps[0] = now;
        self.edge_count = 1;
        Ok(line)
    }

    /// Record a falling edge of `line` seen at `now`.
    pub fn record_edge(&mut self, line: LineId, now: Microseconds, timing: &Timing) {
        if self.phase != Phase::Collecting
            || self.active_line != Some(line)
            || self.edge_count == 0
        {
            return;
        }
        // Start storing timestamps after the request pulse
        if self.edge_count == 1 && now.since(self.timestamps[0]).0 < timing.handshake_filter_us {
            return;
        }
        if let Some(slot) = self.timestamps.get_mut(self.edge_count) {
            *slot = now;
            self.edge_count += 1;
        }
    }

    /// Give up the read in progress, e.g. because the line could not be switched.
    pub fn abort(&mut self) {
        if self.phase == Phase::Collecting {
            self.phase = Phase::OtherError;
        }
    }

    /// Decode the collected edges if a read is in progress, then release the engine for the
    /// next read.
    ///
    /// Also returns why decoding failed, for the caller to report outside the critical section.
    pub fn finish(&mut self) -> (ReadOutcome, Option<DhtError>) {
        let fault = match self.phase {
            Phase::Collecting => self.decode().err(),
            _ => None,
        };
        let outcome = match self.phase {
            Phase::Ok => ReadOutcome::Ok(self.reading),
            Phase::ChecksumError => ReadOutcome::ChecksumError,
            Phase::TooSoon => ReadOutcome::TooSoon,
            Phase::OtherError => ReadOutcome::IoError,
            Phase::Collecting | Phase::ReadyForNext => ReadOutcome::NotRead,
        };
        self.phase = Phase::ReadyForNext;
        (outcome, fault)
    }

    fn decode(&mut self) -> Result<(), DhtError> {
        let bytes = match dht22::decode_bits(self.timestamps()) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.phase = Phase::OtherError;
                return Err(err);
            }
        };
        self.bytes = bytes;
        match Reading::from_bytes(bytes) {
            Ok(reading) => {
                self.phase = Phase::Ok;
                self.reading = reading;
                let completed = self.timestamps[self.edge_count - 1];
                self.last_completed = self.active_line.map(|line| (line, completed));
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::ChecksumError;
                Err(err)
            }
        }
    }
}
