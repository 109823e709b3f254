//! Filesystem, archive and HTTP helpers shared across the pipeline.

pub mod archive;
pub mod fs;
pub mod http;
