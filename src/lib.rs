#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod config;
pub mod engine;
pub mod error;
pub mod line;
mod registry;
mod sequencer;
mod session;
pub mod state;

#[cfg(feature = "esp")]
pub mod esp;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::{Timing, MAX_LINES};
pub use dht22::{MicroTimer, Microseconds, Reading};
pub use engine::DecodeEngine;
pub use error::ReadError;
pub use line::{
    EdgeHandler, LineClaim, LineClaims, LineId, LineList, LineProvider, SignalLine,
};
pub use registry::LineStatus;
pub use sequencer::Dht22m;
pub use session::ReadSession;
pub use state::{Phase, ReadOutcome};
