//! External tool detection.
//!
//! Every program named by a command converter (and its optimizer) is looked
//! up once, before the first model is processed. The resulting [`Toolchain`]
//! is passed to each conversion instead of probing `PATH` ad hoc.

use crate::bundler::settings::{ConverterSpec, ModelDescriptor};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Programs available to converters.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    tools: BTreeMap<String, Option<PathBuf>>,
}

impl Toolchain {
    /// Looks up every program the given models may run.
    pub fn discover<'a>(models: impl IntoIterator<Item = &'a ModelDescriptor>) -> Self {
        let mut toolchain = Self::default();
        for model in models {
            for converter in &model.converters {
                if let ConverterSpec::Command(spec) = converter {
                    toolchain.locate(&spec.program);
                    if let Some(optimize) = &spec.optimize {
                        toolchain.locate(&optimize.program);
                    }
                }
            }
        }
        toolchain
    }

    /// Records a program's location, probing `PATH` the first time.
    pub fn locate(&mut self, program: &str) -> Option<&Path> {
        self.tools
            .entry(program.to_string())
            .or_insert_with(|| match which::which(program) {
                Ok(path) => {
                    log::info!("✓ {} available: {}", program, path.display());
                    Some(path)
                }
                Err(e) => {
                    log::warn!("{} not found in PATH: {}. Backends using it will fail over.", program, e);
                    None
                }
            })
            .as_deref()
    }

    /// Registers a program at a known location.
    pub fn with_tool(mut self, program: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(program.into(), Some(path.into()));
        self
    }

    /// Location of a discovered program.
    pub fn resolve(&self, program: &str) -> Option<&Path> {
        self.tools.get(program).and_then(|p| p.as_deref())
    }

    /// Number of programs that were found.
    pub fn available(&self) -> usize {
        self.tools.values().filter(|p| p.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tools_resolve_to_none() {
        let mut toolchain = Toolchain::default();
        assert!(toolchain.locate("definitely-not-a-real-tool-4d1c").is_none());
        assert!(toolchain.resolve("definitely-not-a-real-tool-4d1c").is_none());
        assert_eq!(toolchain.available(), 0);

        let toolchain = toolchain.with_tool("conv", "/opt/conv");
        assert_eq!(toolchain.resolve("conv"), Some(Path::new("/opt/conv")));
    }
}
