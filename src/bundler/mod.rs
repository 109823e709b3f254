//! Model artifact bundling.
//!
//! Turns converter outputs into shipped bundles and the two lock manifests:
//!
//! - [`convert`] - converter backends and the fallback chain
//! - [`builder`] - staging, hashing, bundling and the per-model pipeline
//! - [`lock`] - build lock persistence and runtime lock projection
//! - [`settings`] - process-wide settings and model descriptors
//! - [`utils`] - filesystem and HTTP helpers

pub mod builder;
pub mod convert;
pub mod error;
pub mod lock;
pub mod settings;
pub mod utils;

pub use builder::{ArtifactStager, ChecksumLedger, ModelReport, Pipeline, StagedFileEntry, StagedModel};
pub use convert::{BackendResult, ConversionOutcome, ConverterBackend, FallbackChain, OutputFileDescriptor, Toolchain};
pub use error::{Error, Result};
pub use lock::{BuildLock, BuildLockEntry, RuntimeLock, RuntimeLockEntry, RuntimeLockProjector};
pub use settings::{ModelDescriptor, Settings, SettingsBuilder, SourceEntry};
