//! Kodegen Bundler Models - model artifact staging and lock manifests.
//!
//! This binary prepares converted model bundles and their build/runtime lock
//! manifests, exiting non-zero on any failure.

use kodegen_bundler_models::cli;
use std::process;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Run CLI and get exit code
    let exit_code = match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            e.exit_code()
        }
    };

    process::exit(exit_code);
}
