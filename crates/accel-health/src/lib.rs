//! accel-health — GPU health feedback loop.
//!
//! A background task polls a [`TelemetrySource`], turns raw per-category
//! status codes into deltas against the previous poll, flips device
//! allocatability in node state, and keeps one taint marker per unhealthy
//! device category in a [`MarkerStore`].

pub mod checker;
pub mod error;
pub mod markers;
pub mod monitor;
pub mod status;
pub mod telemetry;

pub use checker::HealthCache;
pub use error::{HealthError, HealthResult};
pub use markers::{FileMarkerStore, Marker, MarkerStore};
pub use monitor::{HealthMonitor, HealthPolicy};
pub use status::{classify, Classification, HealthCategory, HealthStatus, TaintEffect};
pub use telemetry::{JsonFileSource, TelemetrySource};
