//! Staging, bundling and pipeline orchestration.
//!
//! This module provides the [`Pipeline`] that drives every selected model
//! from its sources to a published bundle, plus the pieces it is built from.
//!
//! # Overview
//!
//! For each model the pipeline:
//! 1. Resolves sources into `<work>/downloads/<model>`
//! 2. Runs the converter [`FallbackChain`](crate::bundler::FallbackChain)
//! 3. Stages and bundles the outputs with [`ArtifactStager`]
//! 4. Records hashes in the [`ChecksumLedger`]
//!
//! After the last model it writes the checksum listing, the build lock and
//! the markdown summary.
//!
//! # Module Organization
//!
//! - [`checksum`] - SHA-256 hashing and size helpers
//! - [`ledger`] - Checksum listing and run summary
//! - [`orchestrator`] - Main [`Pipeline`] and runtime lock projection entry point
//! - [`root`] - Common-root inference
//! - [`stager`] - Staging, bundling and publishing

pub mod checksum;
pub mod ledger;
pub mod orchestrator;
pub mod root;
pub mod stager;

pub use checksum::{
    FileDigest, HASH_CHUNK_SIZE, ZERO_SHA256, calculate_sha256, format_mib, mib_to_bytes,
    sha256_hex,
};
pub use ledger::ChecksumLedger;
pub use orchestrator::{ModelReport, Pipeline, PrepareReport, project_runtime_lock};
pub use root::common_root;
pub use stager::{ArtifactStager, StagedFileEntry, StagedModel};
