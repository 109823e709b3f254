//! Top-level error types for the command line tool.
//!
//! Domain failures come from [`crate::bundler::Error`]; this module wraps them
//! together with argument errors and maps each to a process exit code.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, BundlerError>;

/// Exit code for pipeline failures.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for configuration errors and runtime lock safety violations.
pub const EXIT_CONFIG: i32 = 2;

/// Main error type for all CLI operations
#[derive(Error, Debug)]
pub enum BundlerError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pipeline errors
    #[error("{0}")]
    Bundler(#[from] crate::bundler::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },
}

impl BundlerError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BundlerError::Cli(_) => EXIT_CONFIG,
            BundlerError::Bundler(e) if e.is_config_error() || e.is_security_violation() => {
                EXIT_CONFIG
            }
            _ => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::Error;

    #[test]
    fn exit_codes() {
        let config: BundlerError = Error::Config("no sources".into()).into();
        assert_eq!(config.exit_code(), 2);

        let unsafe_path: BundlerError = Error::UnsafePath {
            model: "m".into(),
            path: "../x".into(),
            reason: "contains a parent-directory segment",
        }
        .into();
        assert_eq!(unsafe_path.exit_code(), 2);

        let failure: BundlerError = Error::GenericError("converter crashed".into()).into();
        assert_eq!(failure.exit_code(), 1);

        let cli: BundlerError = CliError::InvalidArguments { reason: "x".into() }.into();
        assert_eq!(cli.exit_code(), 2);
    }
}
