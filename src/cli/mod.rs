//! Command line interface for the model bundler.
//!
//! This module parses arguments, builds [`Settings`](crate::bundler::Settings)
//! and runs the requested pipeline steps.

mod args;

pub use args::{Args, Command};

use crate::{
    bundler::{Pipeline, builder::project_runtime_lock, settings::load_model_sources},
    error::{CliError, Result},
};

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute(&args).await
}

/// Runs the steps selected by `args`.
///
/// Returns the process exit code on success; failures are returned as errors
/// and mapped to exit codes by the caller.
pub async fn execute(args: &Args) -> Result<i32> {
    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;
    let settings = args.settings()?;
    log::debug!("Settings: {:?}", settings);

    if args.command.prepares() {
        let models = load_model_sources(settings.sources_file())?;
        let pipeline = Pipeline::new(settings.clone(), &models)?;
        let report = pipeline.prepare(&models).await?;
        for model in &report.models {
            match model.fallback_from() {
                Some(from) => log::info!(
                    "✓ {} → {} ({} fell back to {})",
                    model.model_id,
                    model.staged.bundle_name,
                    from,
                    model.staged.backend
                ),
                None => log::info!(
                    "✓ {} → {} ({})",
                    model.model_id,
                    model.staged.bundle_name,
                    model.staged.backend
                ),
            }
        }
    }

    if args.command.projects() {
        let runtime = project_runtime_lock(&settings).await?;
        log::info!(
            "✓ Runtime lock lists {} model(s): {}",
            runtime.models().count(),
            settings.runtime_lock_path().display()
        );
    }

    Ok(0)
}
