//! accel-cdi — the on-disk Container Device Interface registry.
//!
//! Container runtimes read CDI spec files to map host device nodes into a
//! workload. This crate keeps those files in line with the allocation
//! tables: one stable spec file per vendor/class, one entry per device,
//! plus optional claim-scoped entries that carry only environment, hooks
//! and mounts.

pub mod claim;
pub mod devices;
pub mod error;
pub mod registry;
pub mod spec;
pub mod sync;
pub mod version;

pub use claim::{claim_entry_names, delete_claim_entry, upsert_claim_entry};
pub use devices::registry_entries;
pub use error::{CdiError, CdiResult};
pub use registry::{Registry, SpecFile};
pub use spec::{CdiDevice, ContainerEdits, DeviceNode, Hook, Mount, Spec};
pub use sync::{sync_devices, SyncReport};
pub use version::minimum_required_version;
