//! Process supervision and run lifecycle for yolobridge.
//!
//! One [`engine::RunEngine`] serves all channels: it builds the command,
//! registers the run, spawns and supervises the child process, streams
//! parsed events, scans artifacts, and assembles the final
//! [`RunResult`](yolobridge_core::result::RunResult).

pub mod engine;
pub mod process;
pub mod registry;

pub use engine::RunEngine;
pub use registry::{ChannelKind, RunRegistry, RunState};
