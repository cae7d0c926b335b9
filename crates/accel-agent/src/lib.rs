//! accel-agent — wiring for the per-node accelerator daemon.
//!
//! The binary in `main.rs` parses flags, builds [`accel_node::NodeState`]
//! and serves [`api::build_router`]. The pieces live here so integration
//! tests can drive the HTTP surface directly.

pub mod api;
pub mod publisher;

pub use api::{build_router, telemetry_snapshot, ApiState};
pub use publisher::FilePublisher;
