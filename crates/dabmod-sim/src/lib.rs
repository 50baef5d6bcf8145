//! Stub DabMod engine for integration testing.
//!
//! Serves the remote-control protocol on a local TCP port so the control
//! client can be exercised end to end without a modulator: scripted
//! replies, a stateful parameter table, coefficient-file reloads, and a
//! journal of every frame received.

pub mod engine;
pub mod test_util;

pub use engine::{EngineBuilder, RecordedFrame, StubEngine};
