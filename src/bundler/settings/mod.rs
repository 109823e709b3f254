//! Configuration structures for the model pipeline.
//!
//! [`Settings`] holds process-wide paths and tags established once at
//! startup; [`ModelDescriptor`] and friends describe each model as declared in
//! the model source list.

mod builder;
mod core;
mod model;

pub use builder::{
    DEFAULT_BUILD_LOCK, DEFAULT_CONTRACT_VERSION, DEFAULT_DIST_DIR, DEFAULT_RELEASE_TAG,
    DEFAULT_SOURCES_FILE, DEFAULT_WORK_DIR, SettingsBuilder,
};
pub use core::{CHECKSUM_LISTING_NAME, Settings};
pub use model::{
    CommandSpec, ConverterSpec, ModelDescriptor, OptimizeSpec, OutputSpec, Precision,
    PrebuiltSpec, SourceEntry, SourceKind, SourceLocation, load_model_sources,
};
