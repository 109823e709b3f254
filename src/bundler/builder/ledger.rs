//! Checksum listing and run summary.
//!
//! The listing groups every staged file per model under a `# <display name>`
//! heading, one `<sha256>  <visible path>` line per file (excluded files
//! too), with a blank line between models. The summary is a markdown table
//! rendered with handlebars. Both files are replaced atomically on each run,
//! never appended to.

use super::{ModelReport, checksum::format_mib};
use crate::bundler::{
    error::{Error, Result},
    utils::fs::write_atomic,
};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

const SUMMARY_TEMPLATE: &str = r#"## Model artifacts `{{release}}`

| Model | Backend | Bundle | Size (MiB) | SHA-256 |
| --- | --- | --- | ---: | --- |
{{#each rows}}
| {{name}} | {{backend}}{{#if fallback_from}} (fallback from {{fallback_from}}){{/if}} | `{{bundle}}` | {{size_mb}} | `{{sha256}}` |
{{/each}}

Checksums: `{{listing}}` · generated {{generated}}
"#;

#[derive(Debug, Clone, Serialize)]
struct SummaryRow {
    name: String,
    backend: String,
    fallback_from: Option<String>,
    bundle: String,
    size_mb: String,
    sha256: String,
}

#[derive(Debug, Clone)]
struct ListingSection {
    heading: String,
    lines: Vec<(String, String)>,
}

/// Accumulates per-model checksums and summary rows for one run.
#[derive(Debug, Clone, Default)]
pub struct ChecksumLedger {
    sections: Vec<ListingSection>,
    rows: Vec<SummaryRow>,
}

impl ChecksumLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a processed model. Call in processing order.
    pub fn record(&mut self, report: &ModelReport) {
        let staged = &report.staged;
        self.sections.push(ListingSection {
            heading: report.display_name.clone(),
            lines: staged
                .files
                .iter()
                .map(|f| (f.sha256.clone(), f.visible.clone()))
                .collect(),
        });
        self.rows.push(SummaryRow {
            name: report.display_name.clone(),
            backend: staged.backend.clone(),
            fallback_from: report.fallback_from().map(str::to_string),
            bundle: staged.bundle_name.clone(),
            size_mb: format!("{:.2}", format_mib(staged.bundle_size)),
            sha256: staged.bundle_sha256.clone(),
        });
    }

    /// Number of models recorded.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// The checksum listing text.
    pub fn listing(&self) -> String {
        self.sections
            .iter()
            .map(|section| {
                let mut block = format!("# {}\n", section.heading);
                for (sha, path) in &section.lines {
                    block.push_str(&format!("{sha}  {path}\n"));
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Writes the checksum listing.
    pub async fn write_listing(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.listing()).await?;
        log::info!("Wrote checksum listing {}", path.display());
        Ok(())
    }

    /// Renders the markdown summary.
    ///
    /// # Arguments
    ///
    /// * `release` - Release tag the bundles are published under
    /// * `listing_name` - File name of the checksum listing
    pub fn summary(&self, release: &str, listing_name: &str) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string("summary", SUMMARY_TEMPLATE)
            .map_err(|e| Error::GenericError(format!("failed to register summary template: {}", e)))?;

        let data = serde_json::json!({
            "release": release,
            "rows": self.rows,
            "listing": listing_name,
            "generated": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        });
        Ok(handlebars.render("summary", &data)?)
    }

    /// Renders and writes the summary.
    pub async fn write_summary(&self, path: &Path, release: &str, listing_name: &str) -> Result<()> {
        let summary = self.summary(release, listing_name)?;
        write_atomic(path, summary).await?;
        log::info!("Wrote run summary {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::builder::{StagedFileEntry, StagedModel};
    use crate::bundler::convert::ConversionAttempt;
    use std::path::PathBuf;

    fn entry(relative: &str, sha: &str, included: bool) -> StagedFileEntry {
        StagedFileEntry {
            relative: relative.into(),
            visible: relative.trim_start_matches("models/").into(),
            sha256: sha.into(),
            size_bytes: 10,
            size_mb: 0.0,
            included,
            label: None,
            min_bytes: None,
            min_mb: None,
        }
    }

    fn report(id: &str, name: &str, files: Vec<StagedFileEntry>, failed: Vec<ConversionAttempt>) -> ModelReport {
        ModelReport {
            model_id: id.into(),
            display_name: name.into(),
            staged: StagedModel {
                model_id: id.into(),
                backend: "ncnn".into(),
                files,
                common_root: "models".into(),
                staging_dir: PathBuf::from("/stage"),
                bundle_name: format!("{id}_v1.zip"),
                bundle_path: PathBuf::from(format!("/dist/{id}_v1.zip")),
                bundle_sha256: "f".repeat(64),
                bundle_size: 3 * 1024 * 1024,
            },
            metadata: Default::default(),
            failed,
        }
    }

    #[test]
    fn listing_groups_staged_files_per_model() {
        let mut ledger = ChecksumLedger::new();
        ledger.record(&report(
            "a",
            "Model A",
            vec![entry("models/a.bin", "aa", true), entry("logs/x.txt", "xx", false)],
            vec![],
        ));
        ledger.record(&report(
            "b",
            "Model B",
            vec![entry("models/b.bin", "bb", true), entry("models/b.param", "bp", true)],
            vec![],
        ));

        assert_eq!(
            ledger.listing(),
            "# Model A\naa  a.bin\nxx  logs/x.txt\n\n# Model B\nbb  b.bin\nbp  b.param\n"
        );
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn summary_mentions_fallback() {
        let mut ledger = ChecksumLedger::new();
        ledger.record(&report(
            "a",
            "Model A",
            vec![entry("models/a.bin", "aa", true)],
            vec![ConversionAttempt {
                backend: "tflite".into(),
                error: "converter missing".into(),
            }],
        ));

        let summary = ledger.summary("models-v9", "SHA256SUMS.txt").unwrap();
        assert!(summary.contains("`models-v9`"));
        assert!(summary.contains("Model A | ncnn (fallback from tflite)"));
        assert!(summary.contains("| 3.00 |"));
        assert!(summary.contains("SHA256SUMS.txt"));
    }

    #[tokio::test]
    async fn rewriting_the_summary_replaces_it() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("summary.md");
        std::fs::write(&path, "stale notes\n").unwrap();

        let mut ledger = ChecksumLedger::new();
        ledger.record(&report("a", "Model A", vec![entry("models/a.bin", "aa", true)], vec![]));
        ledger.write_summary(&path, "models-v9", "SHA256SUMS.txt").await.unwrap();
        ledger.write_summary(&path, "models-v9", "SHA256SUMS.txt").await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("stale notes"));
        assert_eq!(written.matches("| Model |").count(), 1);
        assert_eq!(written.matches("| Model A |").count(), 1);
    }
}
