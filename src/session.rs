use std::io;

use dht22::MicroTimer;
use embedded_hal::delay::DelayNs;

use crate::line::LineProvider;
use crate::sequencer::Dht22m;

/// One complete read of a sensor, rendered as a status line.
///
/// The line is one of
/// - `Ok;<temperature>;<humidity>` e.g. `Ok;-3.5;41.0`
/// - `ChecksumError`
/// - `ReadTooSoon`
/// - `NotRead`
/// - `ReaderBusy` if another read is in progress or the sensor was read too recently
/// - `IOError`
///
/// followed by a newline.
#[derive(Debug, Clone)]
pub struct ReadSession {
    message: String,
    position: usize,
}

impl ReadSession {
    /// Read `sensor`, blocking for [`Timing::settle_ms`](crate::Timing::settle_ms) through
    /// `settle` while the sensor transmits. The wait is never cut short.
    pub fn open<P, Timer, D, W>(driver: &Dht22m<P, Timer, D>, sensor: usize, settle: &mut W) -> Self
    where
        P: LineProvider,
        Timer: MicroTimer + Send + Sync + 'static,
        D: DelayNs,
        W: DelayNs,
    {
        let message = match driver.begin_read(sensor) {
            Ok(()) => {
                settle.delay_ms(driver.timing().settle_ms);
                format!("{}\n", driver.finalize_read())
            }
            Err(err) => format!("{}\n", err.status()),
        };
        Self {
            message,
            position: 0,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl io::Read for ReadSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.message.as_bytes()[self.position..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }
}
