//! accel-node — per-node claim lifecycle.
//!
//! [`NodeState`] owns the allocation table, the CDI registry and the
//! prepared-claims ledger behind one async mutex. Prepare and Unprepare,
//! rescans and health updates all serialize on it, and the ledger is
//! written inside the same critical section as the in-memory change.

pub mod error;
pub mod publish;
pub mod state;

pub use error::{NodeError, NodeResult};
pub use publish::{InventoryPublisher, MemoryPublisher};
pub use state::{NodeSettings, NodeState};
