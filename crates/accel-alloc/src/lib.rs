//! accel-alloc — per-family allocation tables.
//!
//! Single-function families (Gaudi, GPU) use [`ExclusiveTable`]: a device is
//! either free or bound to one claimant. QAT uses [`QatTable`], where each
//! physical function owns its virtual functions and a service profile that
//! can only change while none of them is allocated.
//!
//! [`AllocationTable`] is the closed set of tables chosen at startup; node
//! state drives it through the [`Allocatable`] trait.

pub mod error;
pub mod exclusive;
pub mod qat;
pub mod table;

pub use error::{AllocError, AllocResult};
pub use exclusive::ExclusiveTable;
pub use qat::{PhysicalFunction, QatTable, VirtualFunction, CONTROL_NODE_UID};
pub use table::{Allocatable, Allocation, AllocationTable};
