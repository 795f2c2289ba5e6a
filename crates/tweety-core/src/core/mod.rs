//! Core module: the session state machine.
//!
//! - `message`: message log entry types
//! - `session`: session controller (submit / stop / reload / persistence)

pub mod message;
pub mod session;
