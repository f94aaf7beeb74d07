//! The seam between the driver and the platform's GPIO layer.

use core::convert::Infallible;
use core::fmt;
use core::str::FromStr;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::MAX_LINES;

/// Identifier of a physical line, as understood by the [`LineProvider`].
/// Kept signed so that nonsense identifiers survive parsing and fail at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineId(pub i32);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback registered for the falling edges of one line.
///
/// It is invoked from interrupt context and must neither block nor allocate.
pub type EdgeHandler = Box<dyn FnMut() + Send + 'static>;

/// A claimed line the sensor is attached to. The line idles high through a pull-up.
pub trait SignalLine {
    type Error: fmt::Debug;
    /// Switch to output and pull the line low
    fn drive_low(&mut self) -> Result<(), Self::Error>;
    /// Release the line back to its idle high level
    fn set_high(&mut self) -> Result<(), Self::Error>;
    /// Switch to input so the sensor can drive the line
    fn listen(&mut self) -> Result<(), Self::Error>;
}

/// Hands out lines and falling-edge subscriptions.
///
/// Dropping a [`Self::Subscription`] must unregister its handler before returning,
/// dropping a [`Self::Line`] releases the line.
pub trait LineProvider {
    type Line: SignalLine;
    type Subscription;
    type Error: fmt::Debug;

    /// Claim a line. The returned line may be in any mode.
    fn request(&mut self, id: LineId) -> Result<Self::Line, Self::Error>;

    /// Register `handler` for every falling edge on `line`.
    fn subscribe(
        &mut self,
        line: &mut Self::Line,
        id: LineId,
        handler: EdgeHandler,
    ) -> Result<Self::Subscription, Self::Error>;
}

/// The lines a [`LineProvider`] has handed out. Clones share the same set.
#[derive(Debug, Default, Clone)]
pub struct LineClaims(Arc<Mutex<HashSet<LineId>>>);

impl LineClaims {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<LineId>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `id`, or `None` if it is already claimed.
    pub fn claim(&self, id: LineId) -> Option<LineClaim> {
        if !self.lock().insert(id) {
            return None;
        }
        Some(LineClaim {
            id,
            claims: self.clone(),
        })
    }

    pub fn is_claimed(&self, id: LineId) -> bool {
        self.lock().contains(&id)
    }
}

/// Exclusive use of one line, given up on drop.
#[derive(Debug)]
pub struct LineClaim {
    id: LineId,
    claims: LineClaims,
}

impl LineClaim {
    pub fn id(&self) -> LineId {
        self.id
    }
}

impl Drop for LineClaim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.id);
    }
}

/// Ordered list of the lines of all sensors. The position in the list is the sensor index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineList(heapless::Vec<LineId, MAX_LINES>);

impl LineList {
    /// Longest request text that is looked at; anything after it is cut off.
    pub const MAX_REQUEST_LEN: usize = 31;

    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of line numbers separated by spaces, commas or semicolons.
    ///
    /// Parsing stops at the first token that does not start with a number, keeping the lines
    /// read so far, and after [`MAX_LINES`] lines. Trailing garbage after the digits of a
    /// token is ignored, so a terminating newline does no harm.
    pub fn parse(request: &str) -> Self {
        let mut end = request.len().min(Self::MAX_REQUEST_LEN);
        while !request.is_char_boundary(end) {
            end -= 1;
        }
        let mut list = Self::new();
        for token in request[..end].split([' ', ';', ',']) {
            let Some(value) = leading_integer(token) else {
                break;
            };
            if list.0.push(LineId(value)).is_err() {
                break;
            }
        }
        list
    }

    pub fn as_slice(&self) -> &[LineId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for LineList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl<'a> FromIterator<&'a LineId> for LineList {
    /// Lines beyond [`MAX_LINES`] are dropped.
    fn from_iter<I: IntoIterator<Item = &'a LineId>>(iter: I) -> Self {
        Self(iter.into_iter().copied().take(MAX_LINES).collect())
    }
}

/// Space separated line numbers
impl fmt::Display for LineList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, id) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Optional whitespace, an optional sign and at least one digit.
fn leading_integer(token: &str) -> Option<i32> {
    let token = token.trim_start();
    let sign_len = usize::from(token.starts_with(['+', '-']));
    let digits = token[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    token[..sign_len + digits].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &LineList) -> Vec<i32> {
        list.as_slice().iter().map(|id| id.0).collect()
    }

    #[test]
    fn parses_all_separators() {
        assert_eq!(ids(&LineList::parse("4 17;27,22")), [4, 17, 27, 22]);
    }

    #[test]
    fn tolerates_trailing_newline_and_separator() {
        assert_eq!(ids(&LineList::parse("4 17\n")), [4, 17]);
        assert_eq!(ids(&LineList::parse("4 17 ")), [4, 17]);
    }

    #[test]
    fn stops_at_first_bad_token() {
        assert_eq!(ids(&LineList::parse("4 x 17")), [4]);
        assert_eq!(ids(&LineList::parse("4,,17")), [4]);
        assert!(LineList::parse(" 4").is_empty());
        assert!(LineList::parse("").is_empty());
        assert!(LineList::parse("none").is_empty());
    }

    #[test]
    fn keeps_signed_and_suffixed_numbers() {
        assert_eq!(ids(&LineList::parse("-1 12abc +3")), [-1, 12, 3]);
    }

    #[test]
    fn caps_at_max_lines() {
        assert_eq!(
            ids(&LineList::parse("1 2 3 4 5 6 7 8 9 10")),
            [1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn only_looks_at_request_prefix() {
        // The 31 byte cut lands inside "12345".
        let request = "1000000000 2000000000 3000 12345";
        assert_eq!(
            ids(&LineList::parse(request)),
            [1_000_000_000, 2_000_000_000, 3000, 1234]
        );
    }

    #[test]
    fn out_of_range_number_ends_parsing() {
        assert_eq!(ids(&LineList::parse("5 99999999999")), [5]);
    }

    #[test]
    fn claims_are_exclusive_until_dropped() {
        let claims = LineClaims::new();
        let claim = claims.claim(LineId(4)).unwrap();
        assert_eq!(claim.id(), LineId(4));
        assert!(claims.claim(LineId(4)).is_none());
        assert!(claims.clone().claim(LineId(5)).is_some());
        assert!(!claims.is_claimed(LineId(5)));

        drop(claim);
        assert!(!claims.is_claimed(LineId(4)));
        assert!(claims.claim(LineId(4)).is_some());
    }

    #[test]
    fn displays_space_separated() {
        assert_eq!(LineList::parse("4;17,27").to_string(), "4 17 27");
        assert_eq!(LineList::new().to_string(), "");
        let list: LineList = "22".parse().unwrap();
        assert_eq!(list.to_string(), "22");
    }
}
