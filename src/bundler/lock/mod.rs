//! Lock manifests.
//!
//! - [`BuildLock`] records everything one preparation run produced: bundle
//!   hashes, every staged file and the metadata of the backend used.
//! - [`RuntimeLock`] is the verified, allowlisted projection of it that a
//!   shipped application loads.

mod build;
mod runtime;

pub use build::{BuildLock, BuildLockEntry, LockedFile, LockedHash, RuntimeOverride};
pub use runtime::{
    METADATA_ENTRY_BACKEND, METADATA_ENTRY_ID, MetadataEntry, RUNTIME_BACKENDS, RuntimeFile,
    RuntimeLock, RuntimeLockEntry, RuntimeLockProjector, RuntimeLockRecord,
};
