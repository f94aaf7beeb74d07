//! The decode engine shared by all sensors and the critical section guarding it.

use core::cell::RefCell;
use std::sync::Arc;

use critical_section::Mutex;
use dht22::MicroTimer;
use log::{debug, warn};

use crate::config::Timing;
use crate::error::ReadError;
use crate::line::{EdgeHandler, LineId};
use crate::state::{Phase, ReadOutcome, SharedDecodeState};

/// Owns the [`SharedDecodeState`] and the clock the edges are stamped with.
///
/// The state is only reachable through [`DecodeEngine::with_state`], which enters a critical
/// section that is also safe to enter from the edge interrupt.
pub struct DecodeEngine<Timer> {
    timer: Timer,
    timing: Timing,
    state: Mutex<RefCell<SharedDecodeState>>,
}

impl<Timer> DecodeEngine<Timer>
where
    Timer: MicroTimer,
{
    pub fn new(timer: Timer, timing: Timing) -> Self {
        Self {
            timer,
            timing,
            state: Mutex::new(RefCell::new(SharedDecodeState::default())),
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Run `f` inside the critical section.
    ///
    /// `f` has to be short: it delays the edge interrupt of every line.
    #[inline]
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SharedDecodeState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    pub fn phase(&self) -> Phase {
        self.with_state(|state| state.phase())
    }

    /// Record a falling edge of `line`. Called from interrupt context.
    #[inline]
    pub fn capture_edge(&self, line: LineId) {
        let now = self.timer.now();
        self.with_state(|state| state.record_edge(line, now, &self.timing));
    }

    /// Claim the engine for `sensor`, see [`SharedDecodeState::arm`].
    ///
    /// A refused read is finished before leaving the critical section, so the engine is
    /// ready again unless it was busy to begin with.
    pub(crate) fn arm(&self, sensor: usize, line: Option<LineId>) -> Result<LineId, ReadError> {
        let now = self.timer.now();
        self.with_state(|state| {
            let armed = state.arm(sensor, line, now, &self.timing);
            if matches!(armed, Err(err) if err != ReadError::Busy) {
                state.finish();
            }
            armed
        })
    }

    /// Give up the read in progress and release the engine.
    pub(crate) fn abort(&self) {
        self.with_state(|state| {
            state.abort();
            state.finish()
        });
    }

    /// Decode what was captured since the read began and make the engine available again.
    ///
    /// Must be called once after every successful [`begin_read`](crate::Dht22m::begin_read),
    /// no earlier than [`Timing::settle_ms`] later. Without a read in progress nothing changes
    /// and [`ReadOutcome::NotRead`] is returned.
    pub fn finalize_read(&self) -> ReadOutcome {
        let (outcome, fault) = self.with_state(|state| state.finish());
        match fault {
            Some(err) => warn!("{err}"),
            None => debug!("Read finished: {outcome}"),
        }
        outcome
    }
}

impl<Timer> DecodeEngine<Timer>
where
    Timer: MicroTimer + Send + Sync + 'static,
{
    /// The interrupt handler to register for the falling edges of `line`.
    pub fn edge_handler(self: &Arc<Self>, line: LineId) -> EdgeHandler {
        let engine = Arc::clone(self);
        Box::new(move || engine.capture_edge(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClock;
    use std::thread;

    #[test]
    fn handler_records_edges_of_its_line() {
        let clock = SimClock::new();
        let engine = Arc::new(DecodeEngine::new(clock.clone(), Timing::default()));
        assert_eq!(engine.arm(0, Some(LineId(4))), Ok(LineId(4)));

        let mut ours = engine.edge_handler(LineId(4));
        let mut theirs = engine.edge_handler(LineId(5));
        clock.advance(600);
        ours();
        theirs();
        assert_eq!(engine.with_state(|state| state.edge_count()), 2);
    }

    #[test]
    fn edges_from_other_threads_are_serialized() {
        let clock = SimClock::new();
        let engine = Arc::new(DecodeEngine::new(clock.clone(), Timing::default()));
        engine.arm(0, Some(LineId(4))).unwrap();
        clock.advance(1_000);

        // All edges share one instant, so every bit decodes as 0
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let mut handler = engine.edge_handler(LineId(4));
                thread::spawn(move || {
                    for _ in 0..20 {
                        handler();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(
            engine.with_state(|state| state.edge_count()),
            dht22::FRAME_EDGES
        );
        assert_eq!(
            engine.finalize_read(),
            ReadOutcome::Ok(dht22::Reading::default())
        );
        assert_eq!(engine.phase(), Phase::ReadyForNext);
    }

    #[test]
    fn finalize_without_read() {
        let engine = DecodeEngine::new(SimClock::new(), Timing::default());
        assert_eq!(engine.finalize_read(), ReadOutcome::NotRead);
    }

    #[test]
    fn refused_reads_leave_engine_ready() {
        let clock = SimClock::new();
        let engine = DecodeEngine::new(clock.clone(), Timing::default());
        assert_eq!(
            engine.arm(2, None),
            Err(ReadError::NotConfigured { sensor: 2 })
        );
        assert_eq!(engine.phase(), Phase::ReadyForNext);
        assert_eq!(engine.finalize_read(), ReadOutcome::NotRead);

        engine.arm(0, Some(LineId(4))).unwrap();
        assert_eq!(engine.arm(1, Some(LineId(5))), Err(ReadError::Busy));
        assert_eq!(engine.phase(), Phase::Collecting);
    }

    #[test]
    fn abort_releases_the_engine() {
        let engine = DecodeEngine::new(SimClock::new(), Timing::default());
        engine.arm(0, Some(LineId(4))).unwrap();
        assert_eq!(engine.phase(), Phase::Collecting);
        engine.abort();
        assert_eq!(engine.phase(), Phase::ReadyForNext);
    }
}
