//! Error types for staging, conversion and lock reconciliation.
//!
//! [`Error`] is the domain error returned by everything under [`crate::bundler`]
//! and [`crate::source`]. The [`Context`] and [`ErrorExt`] traits attach
//! human-readable context, and [`bail!`](crate::bail) returns early with a
//! [`Error::GenericError`].

use std::{fmt::Display, path::PathBuf};
use thiserror::Error as DeriveError;

/// Result alias for bundler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while preparing model artifacts.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// Free-form error message.
    #[error("{0}")]
    GenericError(String),

    /// Error wrapped with additional context.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Plain I/O error.
    #[error("`{0}`")]
    IoError(#[from] std::io::Error),

    /// I/O error tied to a path.
    #[error("{context} {}: {error}", path.display())]
    Fs {
        /// Operation that failed
        context: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        error: std::io::Error,
    },

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failure.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Zip archive failure.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// HTTP download failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Template rendering failure.
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// Invalid or missing model configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Downloaded archive does not contain exactly one top-level directory.
    #[error("archive has no single root: {url} ({found} top-level directories)")]
    ArchiveNoSingleRoot {
        /// Archive location
        url: String,
        /// Number of top-level directories found
        found: usize,
    },

    /// A converter output is missing or implausibly small.
    #[error("implausible output {}: {size} bytes, expected at least {min_bytes}", path.display())]
    Plausibility {
        /// Output file
        path: PathBuf,
        /// Actual size in bytes (0 when missing)
        size: u64,
        /// Required minimum
        min_bytes: u64,
    },

    /// Every backend in a fallback chain failed.
    #[error("all converter backends failed for {model}: {}", attempts.join("; "))]
    ConversionExhausted {
        /// Model id
        model: String,
        /// `backend: reason` per attempt
        attempts: Vec<String>,
    },

    /// External tool exited unsuccessfully.
    #[error("{tool} failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        /// Program that was run
        tool: String,
        /// Exit code if any
        code: Option<i32>,
        /// Tail of captured stderr
        stderr: String,
    },

    /// External tool exceeded its time budget.
    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout {
        /// Program that was run
        tool: String,
        /// Timeout in seconds
        seconds: u64,
    },

    /// Lock path is absolute or escapes its root.
    #[error("unsafe path in {model}: {path} ({reason})")]
    UnsafePath {
        /// Model id
        model: String,
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// File referenced by a lock is missing on disk.
    #[error("missing model file for {model}: {}", path.display())]
    MissingFile {
        /// Model id
        model: String,
        /// Expected location
        path: PathBuf,
    },

    /// Build lock file entry carries no hash to verify against.
    #[error("model '{model}': {path} has no recorded sha256")]
    MissingHash {
        /// Model id
        model: String,
        /// Path as listed in the lock
        path: String,
    },

    /// File on disk no longer matches its recorded hash.
    #[error("hash mismatch for {}: lock has {recorded}, disk has {actual}", path.display())]
    HashMismatch {
        /// File checked
        path: PathBuf,
        /// Hash recorded in the build lock
        recorded: String,
        /// Hash recomputed from disk
        actual: String,
    },

    /// File on disk is smaller than its minimum-size guard.
    #[error("{} is {size} bytes, below the {min_bytes} byte guard", path.display())]
    BelowMinimumSize {
        /// File checked
        path: PathBuf,
        /// Actual size
        size: u64,
        /// Guard
        min_bytes: u64,
    },
}

impl Error {
    /// Whether the error is a safety violation of the runtime manifest.
    pub fn is_security_violation(&self) -> bool {
        match self {
            Error::UnsafePath { .. }
            | Error::MissingFile { .. }
            | Error::MissingHash { .. }
            | Error::HashMismatch { .. }
            | Error::BelowMinimumSize { .. } => true,
            Error::Context { source, .. } => source.is_security_violation(),
            _ => false,
        }
    }

    /// Whether the error stems from invalid configuration.
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::Config(_) | Error::Toml(_) => true,
            Error::Context { source, .. } => source.is_config_error(),
            _ => false,
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        Error::GenericError(e.to_string())
    }
}

impl From<std::path::StripPrefixError> for Error {
    fn from(e: std::path::StripPrefixError) -> Self {
        Error::GenericError(e.to_string())
    }
}

/// Attach context to a fallible value.
pub trait Context<T> {
    /// Wrap the error (or `None`) with a static message.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Wrap the error (or `None`) with a lazily built message.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Context {
            context: context.to_string(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context {
            context: f().to_string(),
            source: Box::new(e.into()),
        })
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::GenericError(f().to_string()))
    }
}

/// Attach a path to I/O errors.
pub trait ErrorExt<T> {
    /// Convert an I/O error into [`Error::Fs`] with the given operation and path.
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.into(),
            error,
        })
    }
}

/// Return early with a formatted [`Error::GenericError`].
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::bundler::Error::GenericError(format!($msg)))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::bundler::Error::GenericError(format!($fmt, $($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_and_preserves_classification() {
        let inner: Result<()> = Err(Error::UnsafePath {
            model: "m".into(),
            path: "../x".into(),
            reason: "parent traversal",
        });
        let err = inner.context("projecting runtime lock").unwrap_err();
        assert!(err.is_security_violation());
        assert!(err.to_string().starts_with("projecting runtime lock: "));
    }

    #[test]
    fn option_context_yields_generic_error() {
        let err = None::<u8>.context("no value").unwrap_err();
        assert!(matches!(err, Error::GenericError(ref m) if m == "no value"));
        assert!(!err.is_config_error());
    }
}
