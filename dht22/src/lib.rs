#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

/// Number of data bits transmitted by the sensor in one frame.
pub const DATA_BITS: usize = 40;

/// Number of instants recorded for a complete frame.
///
/// Index 0 is the start of the read sequence, indices 1 and 2 are the falling edges of the
/// sensor's handshake response and every following falling edge closes one data bit.
pub const FRAME_EDGES: usize = 3 + DATA_BITS;

/// Pulses strictly longer than this encode a 1.
///
/// Each bit is a 48-55us low period followed by a 22-30us high period for a 0 or a 68-75us
/// high period for a 1, so the longest 0 lasts about 85us and the shortest 1 about 116us.
pub const ONE_BIT_THRESHOLD: Microseconds = Microseconds(101);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtError {
    /// Fewer falling edges than a complete frame needs were captured
    MissingEdges { captured: usize },
    /// The checksum of the read data does not match with the provided checksum
    Checksum { correct: u8, actual: u8 },
}

impl core::fmt::Display for DhtError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DhtError::MissingEdges { captured } => write!(
                f,
                "Incomplete frame: captured {captured} of {FRAME_EDGES} edges"
            ),
            DhtError::Checksum { correct, actual } => write!(
                f,
                "Checksum validation failed. Correct: {correct}, Actual: {actual}"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DhtError {}

/// Represents a number of microseconds.
/// Simple Newtype to attach meaning to the contained primitive.
/// The core::time::Duration which could also be used here is a much larger type in order to accomodate much
/// bigger time spans, which is wasted on an instant that gets written from interrupt context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Microseconds(pub u32);

impl Microseconds {
    /// Time elapsed from `earlier` to `self`.
    ///
    /// Using wrapping arithmetic on unsigned integers, overflow of the timer can be
    /// exploited to count over the whole representable range of the integer type regardless of initial value.
    /// For example for a u8:
    /// 10 - 230 = 36
    #[inline]
    pub fn since(self, earlier: Microseconds) -> Microseconds {
        Microseconds(self.0.wrapping_sub(earlier.0))
    }

    #[inline]
    pub fn as_millis(self) -> u32 {
        self.0 / 1000
    }
}

/// Represents a timer with microsecond resolution
pub trait MicroTimer {
    /// Return an instance in time as a number of microseconds since some fixed point (normally boot or start of the timer).
    /// The implementation is allowed to wrap.
    fn now(&self) -> Microseconds;
}

impl<T: MicroTimer + ?Sized> MicroTimer for &T {
    fn now(&self) -> Microseconds {
        (**self).now()
    }
}

/// Map the width of one bit pulse (falling edge to falling edge) to its value.
#[inline]
pub fn bit_from_width(width: Microseconds) -> bool {
    width > ONE_BIT_THRESHOLD
}

/// Translate the recorded falling edges of one frame into the five transmitted bytes.
///
/// `edges` holds the instants in the order they were captured, see [`FRAME_EDGES`].
/// Additional trailing edges are ignored.
pub fn decode_bits(edges: &[Microseconds]) -> Result<[u8; 5], DhtError> {
    if edges.len() < FRAME_EDGES {
        return Err(DhtError::MissingEdges {
            captured: edges.len(),
        });
    }
    let mut bytes: [u8; 5] = [0; 5];
    // The last falling edge of the handshake is at index 2, each later edge ends one bit
    for (idx, _) in edges[2..FRAME_EDGES]
        .windows(2)
        .map(|pair| bit_from_width(pair[1].since(pair[0])))
        // Count with index to know where to shift the bit
        .enumerate()
        // Ignore 0-bits as that is already their initial value
        .filter(|(_, bit)| *bit)
    {
        let byte_idx = idx / 8;
        let bit_idx = idx % 8;
        bytes[byte_idx] |= 1 << (7 - bit_idx);
    }
    Ok(bytes)
}

/// The low 8 bits of the sum of the four data bytes.
#[inline]
pub fn checksum(bytes: &[u8; 5]) -> u8 {
    bytes[0]
        .wrapping_add(bytes[1])
        .wrapping_add(bytes[2])
        .wrapping_add(bytes[3])
}

/// A valid reading from the DHT22 sensor.
/// Values are kept in the sensor's native resolution of a tenth of a unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub negative: bool,
    /// Temperature magnitude in tenths of a degree Celsius
    pub temperature: u16,
    /// Relative humidity in tenths of a percent
    pub humidity: u16,
}

impl Reading {
    /// Verify the checksum in the last byte and extract the measurement.
    pub fn from_bytes(bytes: [u8; 5]) -> Result<Self, DhtError> {
        let correct = bytes[4];
        let actual = checksum(&bytes);
        if actual != correct {
            return Err(DhtError::Checksum { correct, actual });
        }
        Ok(Self {
            // The MSB of the 16 temperature bits indicates negative temperatures
            negative: bytes[2] & 0x80 != 0,
            temperature: u16::from(bytes[2] & 0x7F) << 8 | u16::from(bytes[3]),
            humidity: u16::from(bytes[0]) << 8 | u16::from(bytes[1]),
        })
    }

    pub fn humidity(&self) -> f32 {
        f32::from(self.humidity) / 10.
    }

    pub fn temperature(&self) -> f32 {
        let temperature = f32::from(self.temperature) / 10.;
        if self.negative {
            -temperature
        } else {
            temperature
        }
    }
}

/// Formats as `<sign><temperature>;<humidity>`, each with one fractional digit.
impl core::fmt::Display for Reading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        write!(
            f,
            "{sign}{}.{};{}.{}",
            self.temperature / 10,
            self.temperature % 10,
            self.humidity / 10,
            self.humidity % 10
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Edges of a well formed frame starting at `start`, using `zero` and `one` as bit widths.
    fn frame_edges(bytes: [u8; 5], start: u32, zero: u32, one: u32) -> Vec<Microseconds> {
        let mut now = start;
        let mut edges = vec![Microseconds(now)];
        // Request pulse plus the sensor's response delay, then its 80us low and 80us high.
        now = now.wrapping_add(1530);
        edges.push(Microseconds(now));
        now = now.wrapping_add(160);
        edges.push(Microseconds(now));
        for idx in 0..DATA_BITS {
            let bit = bytes[idx / 8] & (1 << (7 - idx % 8)) != 0;
            now = now.wrapping_add(if bit { one } else { zero });
            edges.push(Microseconds(now));
        }
        edges
    }

    #[test]
    fn decodes_reference_frame() {
        let bytes = [0x01, 0x0A, 0x00, 0xC8, 0xD3];
        let edges = frame_edges(bytes, 1_000, 90, 120);
        assert_eq!(edges.len(), FRAME_EDGES);
        assert_eq!(decode_bits(&edges), Ok(bytes));

        let reading = Reading::from_bytes(bytes).unwrap();
        assert_eq!(reading.humidity, 266);
        assert_eq!(reading.temperature, 200);
        assert!(!reading.negative);
        assert_eq!(reading.to_string(), "20.0;26.6");
    }

    #[test]
    fn decodes_across_timer_wrap() {
        let bytes = [0x02, 0x58, 0x80, 0x65, 0x3F];
        let edges = frame_edges(bytes, u32::MAX - 3_000, 76, 120);
        assert_eq!(decode_bits(&edges), Ok(bytes));
    }

    #[test]
    fn ignores_edges_past_the_frame() {
        let bytes = [0x01, 0x0A, 0x00, 0xC8, 0xD3];
        let mut edges = frame_edges(bytes, 0, 90, 120);
        let last = *edges.last().unwrap();
        edges.push(Microseconds(last.0 + 500));
        assert_eq!(decode_bits(&edges), Ok(bytes));
    }

    #[test]
    fn incomplete_frame_is_rejected() {
        let edges = frame_edges([0xFF; 5], 0, 90, 120);
        assert_eq!(
            decode_bits(&edges[..FRAME_EDGES - 1]),
            Err(DhtError::MissingEdges { captured: 42 })
        );
        assert_eq!(
            decode_bits(&[]),
            Err(DhtError::MissingEdges { captured: 0 })
        );
    }

    #[test]
    fn negative_temperature() {
        // 0x8065 -> -10.1 degrees, 0x0258 -> 60.0 percent
        let bytes = [0x02, 0x58, 0x80, 0x65, 0x3F];
        let reading = Reading::from_bytes(bytes).unwrap();
        assert!(reading.negative);
        assert_eq!(reading.temperature, 101);
        assert_eq!(reading.to_string(), "-10.1;60.0");
        assert!((reading.temperature() + 10.1).abs() < 1e-4);
        assert!((reading.humidity() - 60.0).abs() < 1e-4);
    }

    #[test]
    fn checksum_mismatch_reports_both_values() {
        let err = Reading::from_bytes([1, 2, 3, 4, 9]).unwrap_err();
        assert_eq!(
            err,
            DhtError::Checksum {
                correct: 9,
                actual: 10
            }
        );
        assert_eq!(
            err.to_string(),
            "Checksum validation failed. Correct: 9, Actual: 10"
        );
    }

    #[test]
    fn threshold_boundary() {
        assert!(!bit_from_width(Microseconds(101)));
        assert!(bit_from_width(Microseconds(102)));
    }

    proptest! {
        #[test]
        fn bit_depends_only_on_width(width in 0u32..10_000) {
            prop_assert_eq!(bit_from_width(Microseconds(width)), width > 101);
        }

        #[test]
        fn bit_value_is_independent_of_position(position in 0usize..DATA_BITS, width in 30u32..300) {
            let mut edges = frame_edges([0; 5], 0, 80, 80);
            // Stretch a single pulse and shift every later edge along with it.
            for edge in &mut edges[position + 3..] {
                edge.0 = edge.0 - 80 + width;
            }
            let bytes = decode_bits(&edges).unwrap();
            let bit = bytes[position / 8] & (1 << (7 - position % 8)) != 0;
            prop_assert_eq!(bit, width > 101);
            prop_assert_eq!(bytes.iter().map(|b| b.count_ones()).sum::<u32>(), u32::from(bit));
        }

        #[test]
        fn checksum_decides_validity(bytes in any::<[u8; 5]>()) {
            let sum = (u32::from(bytes[0]) + u32::from(bytes[1]) + u32::from(bytes[2]) + u32::from(bytes[3])) % 256;
            prop_assert_eq!(Reading::from_bytes(bytes).is_ok(), sum == u32::from(bytes[4]));
        }

        #[test]
        fn any_frame_survives_decoding(data in any::<[u8; 4]>(), start in any::<u32>()) {
            let mut bytes = [data[0], data[1], data[2], data[3], 0];
            bytes[4] = checksum(&bytes);
            let edges = frame_edges(bytes, start, 76, 120);
            prop_assert_eq!(decode_bits(&edges), Ok(bytes));
        }
    }
}
