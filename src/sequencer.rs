//! Starting reads and configuring lines, both serialized by the configuration lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dht22::MicroTimer;
use embedded_hal::delay::DelayNs;
use log::{debug, error};

use crate::config::Timing;
use crate::engine::DecodeEngine;
use crate::error::ReadError;
use crate::line::{LineList, LineProvider, SignalLine};
use crate::registry::{LineStatus, Registry};
use crate::state::ReadOutcome;

/// Everything guarded by the configuration lock.
struct Lines<P: LineProvider, D> {
    registry: Registry<P>,
    // Times the request pulse, which is sent while the lock is held
    delay: D,
}

/// DHT22 driver for up to [`MAX_LINES`](crate::MAX_LINES) sensors sharing one decode engine.
///
/// A read is started with [`begin_read`](Self::begin_read) and, once the sensor had time to
/// transmit, completed with [`finalize_read`](Self::finalize_read). Only one read can be in
/// progress at a time, whichever sensor it is for. [`ReadSession`](crate::ReadSession) wraps
/// both steps.
pub struct Dht22m<P, Timer, D>
where
    P: LineProvider,
{
    engine: Arc<DecodeEngine<Timer>>,
    lines: Mutex<Lines<P, D>>,
}

impl<P, Timer, D> Dht22m<P, Timer, D>
where
    P: LineProvider,
    Timer: MicroTimer + Send + Sync + 'static,
    D: DelayNs,
{
    /// Construct a driver without any configured line.
    pub fn new(provider: P, timer: Timer, delay: D, timing: Timing) -> Self {
        Self {
            engine: Arc::new(DecodeEngine::new(timer, timing)),
            lines: Mutex::new(Lines {
                registry: Registry::new(provider),
                delay,
            }),
        }
    }

    pub fn engine(&self) -> &DecodeEngine<Timer> {
        &self.engine
    }

    pub fn timing(&self) -> &Timing {
        self.engine.timing()
    }

    // The registry is only changed through `Registry::apply`, which leaves it usable even
    // when it unwinds half way.
    fn lock_lines(&self) -> MutexGuard<'_, Lines<P, D>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the sensors to `lines`, sensor `n` to the `n`th line.
    ///
    /// All previous lines are released first. Lines that fail to configure are recorded with
    /// their [`LineStatus`] and do not affect the others. Applying the current list again
    /// does nothing and returns `false`.
    pub fn configure(&self, lines: &LineList) -> bool {
        let mut guard = self.lock_lines();
        let engine = &self.engine;
        guard
            .registry
            .apply(lines, |line| engine.edge_handler(line))
    }

    /// The configured lines in sensor order.
    pub fn line_list(&self) -> LineList {
        self.lock_lines().registry.line_list()
    }

    pub fn line_status(&self, sensor: usize) -> LineStatus {
        self.lock_lines().registry.status(sensor)
    }

    /// Release every line, leaving all sensors unconfigured.
    pub fn release(&self) {
        self.lock_lines().registry.release_all();
    }

    /// Start reading `sensor`.
    ///
    /// Claims the decode engine, sends the request pulse and switches the line to input so
    /// the edge interrupt can record the sensor's answer. This blocks for
    /// [`Timing::request_pulse_us`].
    ///
    /// On success the caller has to wait [`Timing::settle_ms`] and then call
    /// [`finalize_read`](Self::finalize_read). On failure no read is in progress and the
    /// engine is not held.
    pub fn begin_read(&self, sensor: usize) -> Result<(), ReadError> {
        let mut guard = self.lock_lines();
        let Lines { registry, delay } = &mut *guard;
        let configured = registry.configured_line(sensor);
        self.engine
            .arm(sensor, configured.as_ref().map(|(id, _)| *id))
            .map_err(|err| {
                debug!("Read of sensor {sensor} refused: {err}");
                err
            })?;
        // Arming only succeeds for configured sensors
        if let Some((id, line)) = configured {
            debug!("Start read of sensor {sensor} on line {id}");
            if let Err(err) = send_request(line, delay, self.engine.timing()) {
                error!("Sending the request on line {id} failed: {err:?}");
                self.engine.abort();
                return Err(ReadError::Io { line: id });
            }
        }
        Ok(())
    }

    /// Decode the frame of the read started by [`begin_read`](Self::begin_read).
    pub fn finalize_read(&self) -> ReadOutcome {
        self.engine.finalize_read()
    }
}

/// Pull the line low for the request pulse, then release it and listen for the answer.
///
/// If the sequence breaks off, the line is still switched back to input so it does not stay
/// driven low.
fn send_request<L, D>(line: &mut L, delay: &mut D, timing: &Timing) -> Result<(), L::Error>
where
    L: SignalLine,
    D: DelayNs,
{
    let mut line = scopeguard::guard(line, |line| {
        let _ = line.listen();
    });
    line.drive_low()?;
    delay.delay_us(timing.request_pulse_us);
    line.set_high()?;
    let line = scopeguard::ScopeGuard::into_inner(line);
    // End of active send, start collecting data
    line.listen()
}
