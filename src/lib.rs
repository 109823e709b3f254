//! Model artifact bundler library.
//!
//! This library prepares machine-learning model artifacts for release:
//! - Resolves model sources (direct downloads, GitHub files and archives, local paths)
//! - Converts them with a preferred backend, falling back to alternates
//! - Stages, hashes and zips the outputs deterministically
//! - Writes a checksum listing, a build lock and a verified runtime lock
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod bundler;
pub mod cli;
pub mod error;
pub mod source;

// Re-export commonly used types
pub use error::{BundlerError, CliError, Result};
