//! accel-core — shared types for the accelerator agent.
//!
//! Holds the canonical device model, the QAT service bitset, claim and
//! prepared-result types exchanged with the orchestrator, the published
//! inventory shape, PCI naming helpers, and the agent's TOML config.

pub mod claim;
pub mod config;
pub mod error;
pub mod inventory;
pub mod pci;
pub mod services;
pub mod types;

pub use claim::*;
pub use config::AgentConfig;
pub use error::{CoreError, CoreResult};
pub use inventory::*;
pub use services::Services;
pub use types::*;
