//! uat-core: Pure decode + tracking library for the UAT 978 MHz datalink.
//!
//! No async, no I/O — just algorithms. This crate is the shared core used by
//! both `uat-decoder` (SDR receiver) and `uat-reporter` (tracker + reports).

pub mod adsb;
pub mod config;
pub mod demod;
pub mod fec;
pub mod message;
pub mod phase;
pub mod protocol;
pub mod receiver;
pub mod track;
pub mod types;

// Re-export commonly used types at crate root
pub use adsb::AdsbMessage;
pub use demod::Demodulator;
pub use fec::Fec;
pub use message::{MessageType, RawMessage};
pub use phase::{PhaseConverter, SampleFormat};
pub use receiver::Receiver;
pub use track::{AgedField, AircraftState, Tracker};
pub use types::*;
