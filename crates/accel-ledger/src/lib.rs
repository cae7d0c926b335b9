//! accel-ledger — durable record of prepared claims.
//!
//! Each claim UID maps to the devices prepared for it, JSON-serialized into
//! a redb table. Writes commit atomically, so a crash leaves either the old
//! or the new record and never a torn one. The agent reads the ledger back
//! on startup to rebuild allocation state.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{LedgerError, LedgerResult};
pub use store::Ledger;
