//! Preferred-then-alternate conversion.

use super::{BackendResult, ConvertContext, ConverterBackend};
use crate::bundler::{
    error::{Error, Result},
    settings::ModelDescriptor,
};

/// A backend that was tried and failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionAttempt {
    /// Backend id
    pub backend: String,
    /// Why it failed
    pub error: String,
}

/// Result of running a [`FallbackChain`].
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    /// Output of the backend that succeeded
    pub result: BackendResult,
    /// Backends that failed before it, in attempt order
    pub failed: Vec<ConversionAttempt>,
}

impl ConversionOutcome {
    /// Whether the preferred backend failed and an alternate produced the result.
    pub fn fell_back(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Ordered list of backends; the first one that succeeds wins.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    backends: Vec<ConverterBackend>,
}

impl FallbackChain {
    /// Chain in the model's attempt order (preferred backend first).
    pub fn for_model(model: &ModelDescriptor) -> Self {
        Self::new(
            model
                .converter_order()
                .into_iter()
                .map(ConverterBackend::from_spec)
                .collect(),
        )
    }

    /// Chain over explicit backends.
    pub fn new(backends: Vec<ConverterBackend>) -> Self {
        Self { backends }
    }

    /// Backend ids in attempt order.
    pub fn backend_ids(&self) -> Vec<&str> {
        self.backends.iter().map(ConverterBackend::id).collect()
    }

    /// Tries each backend in order.
    ///
    /// Every failure is logged and recorded; only exhaustion of the whole
    /// chain is an error.
    pub async fn run(&self, ctx: &ConvertContext<'_>) -> Result<ConversionOutcome> {
        let mut failed = Vec::new();

        for backend in &self.backends {
            log::info!("Converting {} with {}", ctx.model.id, backend.id());
            match backend.convert(ctx).await {
                Ok(result) => {
                    if !failed.is_empty() {
                        log::warn!(
                            "{}: fell back to {} after {} failed backend(s)",
                            ctx.model.id,
                            result.backend,
                            failed.len()
                        );
                    }
                    return Ok(ConversionOutcome { result, failed });
                }
                Err(e) => {
                    log::warn!("{}: backend {} failed: {}", ctx.model.id, backend.id(), e);
                    failed.push(ConversionAttempt {
                        backend: backend.id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(Error::ConversionExhausted {
            model: ctx.model.id.clone(),
            attempts: failed
                .into_iter()
                .map(|a| format!("{}: {}", a.backend, a.error))
                .collect(),
        })
    }
}
