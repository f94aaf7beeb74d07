use thiserror::Error;

use crate::line::LineId;

/// Why [`Dht22m::begin_read`](crate::Dht22m::begin_read) refused to start a read.
///
/// None of these leave the decode engine occupied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("Another read is in progress")]
    Busy,
    #[error("Line was read {elapsed_ms} ms ago, the sensor needs a longer rest")]
    TooSoon { elapsed_ms: u32 },
    #[error("Sensor {sensor} has no configured line")]
    NotConfigured { sensor: usize },
    #[error("Switching the mode of line {line} failed")]
    Io { line: LineId },
}

impl ReadError {
    /// Status line reported to a read session that could not start.
    pub fn status(&self) -> &'static str {
        match self {
            ReadError::Busy | ReadError::TooSoon { .. } => "ReaderBusy",
            ReadError::NotConfigured { .. } | ReadError::Io { .. } => "IOError",
        }
    }
}
