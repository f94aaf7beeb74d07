/// Maximum number of sensors handled by one driver.
pub const MAX_LINES: usize = 8;

/// Protocol timings used by the driver.
///
/// The defaults follow the AM2302 data sheet with some margin and should only be changed
/// for sensors that are known to behave differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Minimum rest of a line after a successful read. The sensor samples at most every 2 s.
    pub refractory_ms: u32,
    /// Length of the low pulse that requests a measurement. The sensor needs at least 1 ms.
    pub request_pulse_us: u32,
    /// Falling edges closer than this to the start of a read belong to the request pulse.
    pub handshake_filter_us: u32,
    /// Time the sensor is given to transmit a frame. A frame takes less than 6 ms.
    pub settle_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            refractory_ms: 2100,
            request_pulse_us: 1500,
            handshake_filter_us: 500,
            settle_ms: 20,
        }
    }
}
