//! Utilities for testing code that uses RUDP: an in-memory transport with controllable packet
//!  loss, and an event sink that records what it is notified of. They are used for testing
//!  this crate itself, but they are also exported for application testing.

pub mod event;
pub mod memory_transport;
