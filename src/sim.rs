//! Simulated lines with DHT22 sensors attached, for running the driver without hardware.
//!
//! Time only moves when told to: [`SimDelay`] advances the shared [`SimClock`] instead of
//! sleeping, and a sensor answers a request the moment its line is switched to input, firing
//! the registered edge handler for every falling edge of its frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dht22::{MicroTimer, Microseconds, DATA_BITS};
use embedded_hal::delay::DelayNs;

use crate::line::{EdgeHandler, LineClaim, LineClaims, LineId, LineProvider, SignalLine};

#[derive(Debug, Default, Clone)]
pub struct SimClock(Arc<AtomicU32>);

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, us: u32) {
        self.0.fetch_add(us, Ordering::SeqCst);
    }

    pub fn set(&self, us: u32) {
        self.0.store(us, Ordering::SeqCst);
    }
}

impl MicroTimer for SimClock {
    fn now(&self) -> Microseconds {
        Microseconds(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone)]
pub struct SimDelay(pub SimClock);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.advance(ns / 1000);
    }

    fn delay_us(&mut self, us: u32) {
        self.0.advance(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.advance(ms * 1000);
    }
}

/// A sensor answering every request with the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSensor {
    pub frame: [u8; 5],
    /// Number of falling edges of the answer that reach the line, 42 for a complete frame
    pub edges: usize,
}

impl SimSensor {
    pub fn new(frame: [u8; 5]) -> Self {
        Self {
            frame,
            edges: 2 + DATA_BITS,
        }
    }

    /// Answer with `data` and a matching checksum.
    pub fn with_data(data: [u8; 4]) -> Self {
        let mut frame = [data[0], data[1], data[2], data[3], 0];
        frame[4] = dht22::checksum(&frame);
        Self::new(frame)
    }

    /// Stop answering after `edges` falling edges.
    pub fn truncated(mut self, edges: usize) -> Self {
        self.edges = edges;
        self
    }

    /// Gaps between the falling edges of the answer, starting from the release of the line.
    fn edge_gaps(&self) -> impl Iterator<Item = u32> + '_ {
        // Response delay, then the 80us low and 80us high of the handshake
        let handshake = [30, 160].into_iter();
        let bits = (0..DATA_BITS).map(|idx| {
            let one = self.frame[idx / 8] & (1 << (7 - idx % 8)) != 0;
            50 + if one { 70 } else { 26 }
        });
        handshake.chain(bits).take(self.edges)
    }
}

/// Everything that happened on the bus, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Requested(LineId),
    Released(LineId),
    Subscribed(LineId),
    Unsubscribed(LineId),
    DriveLow(LineId),
    High(LineId),
    Listen(LineId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    NoSuchLine(LineId),
    AlreadyClaimed(LineId),
    NoInterrupt(LineId),
    ModeSwitch(LineId),
}

#[derive(Debug, Default, Clone, Copy)]
struct LineSetup {
    sensor: Option<SimSensor>,
    no_interrupt: bool,
    failing_output: bool,
}

#[derive(Default)]
struct Bus {
    setups: HashMap<LineId, LineSetup>,
    handlers: HashMap<LineId, EdgeHandler>,
    events: Vec<SimEvent>,
}

impl Bus {
    fn falling_edge(&mut self, id: LineId) {
        if let Some(handler) = self.handlers.get_mut(&id) {
            handler();
        }
    }
}

/// Handle to a simulated set of lines. Clones share the same lines.
#[derive(Clone)]
pub struct SimBus {
    clock: SimClock,
    claims: LineClaims,
    bus: Arc<Mutex<Bus>>,
}

impl SimBus {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            claims: LineClaims::new(),
            bus: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `id` available without a sensor attached.
    pub fn add_line(&self, id: LineId) -> &Self {
        self.lock().setups.entry(id).or_default();
        self
    }

    pub fn attach(&self, id: LineId, sensor: SimSensor) -> &Self {
        self.lock().setups.entry(id).or_default().sensor = Some(sensor);
        self
    }

    /// Refuse edge interrupts on `id`.
    pub fn without_interrupt(&self, id: LineId) -> &Self {
        self.lock().setups.entry(id).or_default().no_interrupt = true;
        self
    }

    /// Fail every attempt to drive `id`.
    pub fn failing_output(&self, id: LineId, failing: bool) -> &Self {
        self.lock().setups.entry(id).or_default().failing_output = failing;
        self
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn has_handler(&self, id: LineId) -> bool {
        self.lock().handlers.contains_key(&id)
    }

    /// Fire a falling edge on `id` at the current time.
    pub fn falling_edge(&self, id: LineId) {
        self.lock().falling_edge(id);
    }
}

impl LineProvider for SimBus {
    type Line = SimLine;
    type Subscription = SimSubscription;
    type Error = SimError;

    fn request(&mut self, id: LineId) -> Result<SimLine, SimError> {
        let mut bus = self.lock();
        if !bus.setups.contains_key(&id) {
            return Err(SimError::NoSuchLine(id));
        }
        let claim = self
            .claims
            .claim(id)
            .ok_or(SimError::AlreadyClaimed(id))?;
        bus.events.push(SimEvent::Requested(id));
        Ok(SimLine {
            id,
            bus: self.clone(),
            requested: false,
            _claim: claim,
        })
    }

    fn subscribe(
        &mut self,
        _line: &mut SimLine,
        id: LineId,
        handler: EdgeHandler,
    ) -> Result<SimSubscription, SimError> {
        let mut bus = self.lock();
        if bus.setups.get(&id).map_or(true, |setup| setup.no_interrupt) {
            return Err(SimError::NoInterrupt(id));
        }
        bus.handlers.insert(id, handler);
        bus.events.push(SimEvent::Subscribed(id));
        Ok(SimSubscription {
            id,
            bus: self.clone(),
        })
    }
}

pub struct SimLine {
    id: LineId,
    bus: SimBus,
    // Set by the request pulse, the sensor answers once the line is released to input
    requested: bool,
    _claim: LineClaim,
}

impl SignalLine for SimLine {
    type Error = SimError;

    fn drive_low(&mut self) -> Result<(), SimError> {
        let mut bus = self.bus.lock();
        if bus.setups.get(&self.id).is_some_and(|setup| setup.failing_output) {
            return Err(SimError::ModeSwitch(self.id));
        }
        bus.events.push(SimEvent::DriveLow(self.id));
        bus.falling_edge(self.id);
        self.requested = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), SimError> {
        self.bus.lock().events.push(SimEvent::High(self.id));
        Ok(())
    }

    fn listen(&mut self) -> Result<(), SimError> {
        let mut bus = self.bus.lock();
        bus.events.push(SimEvent::Listen(self.id));
        if !std::mem::take(&mut self.requested) {
            return Ok(());
        }
        let Some(sensor) = bus.setups.get(&self.id).and_then(|setup| setup.sensor) else {
            return Ok(());
        };
        for gap in sensor.edge_gaps() {
            self.bus.clock.advance(gap);
            bus.falling_edge(self.id);
        }
        Ok(())
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        self.bus.lock().events.push(SimEvent::Released(self.id));
    }
}

pub struct SimSubscription {
    id: LineId,
    bus: SimBus,
}

impl Drop for SimSubscription {
    fn drop(&mut self) {
        let mut bus = self.bus.lock();
        bus.handlers.remove(&self.id);
        bus.events.push(SimEvent::Unsubscribed(self.id));
    }
}
