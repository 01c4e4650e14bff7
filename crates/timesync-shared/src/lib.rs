//! # timesync-shared
//!
//! Types shared by the timesync store and server: identifiers, the
//! [`Timer`](timer::Timer) record, the progress calculator and the JSON
//! envelopes exchanged with WebSocket observers.

pub mod error;
pub mod progress;
pub mod protocol;
pub mod timer;
pub mod types;
