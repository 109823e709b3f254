//! Model descriptors loaded from the model source list.
//!
//! The source list is a JSON (or TOML) object keyed by model id:
//!
//! ```json
//! {
//!   "restormer_fp16": {
//!     "name": "Restormer",
//!     "artifact": "restormer",
//!     "version": "v1",
//!     "backend": "ncnn",
//!     "precision": "fp16",
//!     "sources": [
//!       { "id": "weights", "type": "file", "url": "https://example.com/restormer.onnx" }
//!     ],
//!     "converters": [
//!       {
//!         "kind": "command",
//!         "backend": "ncnn",
//!         "program": "onnx2ncnn",
//!         "args": ["{source:weights}", "{out_dir}/restormer_fp16.param", "{out_dir}/restormer_fp16.bin"],
//!         "outputs": [
//!           { "file": "restormer_fp16.param", "relative": "models/restormer_fp16.param" },
//!           { "file": "restormer_fp16.bin", "relative": "models/restormer_fp16.bin", "min_mb": 1.0 }
//!         ]
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! Everything is validated once in [`load_model_sources`]; the rest of the
//! pipeline only reads the resulting [`ModelDescriptor`]s.

use crate::bundler::{
    error::{Error, ErrorExt, Result},
    utils::fs::check_relative_path,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use url::Url;

const RAW_GITHUB_BASE: &str = "https://raw.githubusercontent.com";
const CODELOAD_GITHUB_BASE: &str = "https://codeload.github.com";

fn default_true() -> bool {
    true
}

/// Numeric precision tag of a converted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Precision {
    /// Half precision
    Fp16,
    /// Single precision
    Fp32,
}

impl Precision {
    /// Lower-case tag as written to the lock files.
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Fp16 => "fp16",
            Precision::Fp32 => "fp32",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fp16" => Ok(Precision::Fp16),
            "fp32" => Ok(Precision::Fp32),
            other => Err(Error::Config(format!(
                "unknown precision '{other}', expected fp16 or fp32"
            ))),
        }
    }
}

impl TryFrom<String> for Precision {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Precision> for String {
    fn from(value: Precision) -> Self {
        value.as_str().to_string()
    }
}

/// Kind of a model source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single file
    #[default]
    File,
    /// A compressed tree with a single root directory
    Archive,
}

/// Where a source is fetched from, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Remote URL
    Remote(Url),
    /// File or directory on the local filesystem
    Local(PathBuf),
}

/// One source of a model (weights, code archive, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    /// Key used by converters to refer to the resolved path
    pub id: String,

    /// Source kind.
    ///
    /// Default: `file`
    #[serde(rename = "type", default)]
    pub kind: SourceKind,

    /// Direct download URL.
    #[serde(default)]
    pub url: Option<String>,

    /// GitHub `owner/name` repository, used with `commit` (and `path` for files).
    #[serde(default)]
    pub repo: Option<String>,

    /// Repository revision.
    #[serde(default)]
    pub commit: Option<String>,

    /// Path inside `repo`, or a local path when no `repo`/`url` is given.
    #[serde(default)]
    pub path: Option<String>,

    /// Explicit name of the downloaded file.
    #[serde(default)]
    pub filename: Option<String>,
}

impl SourceEntry {
    /// Resolves the configured fields into a concrete location.
    pub fn location(&self) -> Result<SourceLocation> {
        if let Some(raw) = &self.url {
            let url = Url::parse(raw)
                .map_err(|e| Error::Config(format!("source '{}': bad url {raw}: {e}", self.id)))?;
            if url.scheme() == "file" {
                let path = url.to_file_path().map_err(|_| {
                    Error::Config(format!("source '{}': bad file url {raw}", self.id))
                })?;
                return Ok(SourceLocation::Local(path));
            }
            return Ok(SourceLocation::Remote(url));
        }

        if let Some(repo) = &self.repo {
            let commit = self.commit.as_deref().ok_or_else(|| {
                Error::Config(format!("source '{}': repo without commit", self.id))
            })?;
            let raw = match self.kind {
                SourceKind::File => {
                    let path = self.path.as_deref().ok_or_else(|| {
                        Error::Config(format!("source '{}': repo file without path", self.id))
                    })?;
                    format!("{RAW_GITHUB_BASE}/{repo}/{commit}/{path}")
                }
                SourceKind::Archive => format!("{CODELOAD_GITHUB_BASE}/{repo}/tar.gz/{commit}"),
            };
            let url = Url::parse(&raw)
                .map_err(|e| Error::Config(format!("source '{}': bad url {raw}: {e}", self.id)))?;
            return Ok(SourceLocation::Remote(url));
        }

        match &self.path {
            Some(path) => Ok(SourceLocation::Local(PathBuf::from(path))),
            None => Err(Error::Config(format!(
                "source '{}': needs one of url, repo+commit or path",
                self.id
            ))),
        }
    }

    /// Name of the file a `file` source is stored under.
    ///
    /// Explicit `filename`, else the last segment of `path` or of the URL,
    /// else the entry id.
    pub fn file_name(&self) -> String {
        if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let from_path = self
            .path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned());
        let from_url = || {
            self.url
                .as_deref()
                .and_then(|u| Url::parse(u).ok())
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|mut s| s.next_back().map(str::to_string))
                })
                .filter(|s| !s.is_empty())
        };
        from_path
            .filter(|n| !n.is_empty())
            .or_else(from_url)
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Declared converter output.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    /// Prebuilt outputs: id of the source providing the file.
    #[serde(default)]
    pub source: Option<String>,

    /// Prebuilt: path inside a directory source. Command: file name under `{out_dir}`.
    #[serde(default)]
    pub file: Option<String>,

    /// Path inside the bundle.
    pub relative: String,

    /// Whether the file ships in the bundle.
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub include: bool,

    /// Free-form label recorded in the build lock.
    #[serde(default)]
    pub label: Option<String>,

    /// Minimum plausible size in bytes.
    #[serde(default)]
    pub min_bytes: Option<u64>,

    /// Minimum plausible size in MiB, used when `min_bytes` is absent.
    #[serde(default)]
    pub min_mb: Option<f64>,
}

/// Optional post-processing step of a command converter.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeSpec {
    /// Program looked up on `PATH`; the step is skipped when missing.
    pub program: String,

    /// Arguments, with the same placeholders as the converter.
    #[serde(default)]
    pub args: Vec<String>,

    /// Files produced by the optimizer, renamed over declared outputs (`from` → `to`).
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
}

/// Converter that ships files already present in the sources.
#[derive(Debug, Clone, Deserialize)]
pub struct PrebuiltSpec {
    /// Backend id reported for these outputs
    pub backend: String,
    /// Outputs, each naming its `source`
    pub outputs: Vec<OutputSpec>,
}

/// Converter that runs an external tool.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    /// Backend id reported when the tool succeeds
    pub backend: String,
    /// Program name or path
    pub program: String,
    /// Arguments with `{out_dir}`, `{source:<id>}`, `{model_id}`, `{precision}` placeholders
    #[serde(default)]
    pub args: Vec<String>,
    /// Files the tool writes under `{out_dir}`
    pub outputs: Vec<OutputSpec>,
    /// Optional optimizer run after a successful conversion
    #[serde(default)]
    pub optimize: Option<OptimizeSpec>,
    /// Per-tool timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One backend of a model's converter chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConverterSpec {
    /// Copy files from the resolved sources
    Prebuilt(PrebuiltSpec),
    /// Run an external conversion tool
    Command(CommandSpec),
}

impl ConverterSpec {
    /// Backend id this converter produces.
    pub fn backend(&self) -> &str {
        match self {
            ConverterSpec::Prebuilt(spec) => &spec.backend,
            ConverterSpec::Command(spec) => &spec.backend,
        }
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &[OutputSpec] {
        match self {
            ConverterSpec::Prebuilt(spec) => &spec.outputs,
            ConverterSpec::Command(spec) => &spec.outputs,
        }
    }
}

/// A model to prepare, as declared in the source list.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescriptor {
    /// Unique key; filled from the source list key.
    #[serde(skip)]
    pub id: String,

    /// Display name used in the checksum listing and summary.
    pub name: String,

    /// Bundle base name.
    pub artifact: String,

    /// Bundle version.
    pub version: String,

    /// Preferred backend id; the first converter when absent.
    #[serde(default)]
    pub backend: Option<String>,

    /// Precision tag.
    #[serde(default)]
    pub precision: Option<Precision>,

    /// Tile size hint for the runtime.
    #[serde(default)]
    pub tile_size: Option<u32>,

    /// Whether the runtime should load this model.
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default minimum-size guard (MiB) for files without their own.
    #[serde(default)]
    pub min_mb: Option<f64>,

    /// Static metadata keyed by backend id.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Sources to fetch.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,

    /// Converters, tried preferred-first.
    #[serde(default)]
    pub converters: Vec<ConverterSpec>,
}

impl ModelDescriptor {
    /// `<artifact>_<version>`, the staging directory and bundle stem.
    pub fn bundle_stem(&self) -> String {
        format!("{}_{}", self.artifact, self.version)
    }

    /// File name of the shipped bundle.
    pub fn bundle_name(&self) -> String {
        format!("{}.zip", self.bundle_stem())
    }

    /// Converters in attempt order: the preferred backend first, then the
    /// rest in declaration order.
    pub fn converter_order(&self) -> Vec<&ConverterSpec> {
        let preferred = self.backend.as_deref();
        let (mut first, rest): (Vec<_>, Vec<_>) = self
            .converters
            .iter()
            .partition(|c| Some(c.backend()) == preferred);
        first.extend(rest);
        first
    }

    /// Static metadata for a backend, matched case-insensitively.
    pub fn backend_metadata(&self, backend: &str) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.metadata
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(backend))
            .and_then(|(_, value)| value.as_object())
    }

    /// Checks everything the pipeline relies on later.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("model '{}': {msg}", self.id)));

        if let Err(reason) = check_model_id(&self.id) {
            return Err(Error::Config(format!("invalid model id '{}': {reason}", self.id)));
        }
        for (field, value) in [
            ("name", &self.name),
            ("artifact", &self.artifact),
            ("version", &self.version),
        ] {
            if value.trim().is_empty() {
                return fail(format!("{field} must not be empty"));
            }
        }
        if self.bundle_stem().contains(['/', '\\']) {
            return fail(format!("bundle name '{}' contains a path separator", self.bundle_stem()));
        }
        if self.tile_size == Some(0) {
            return fail("tile_size must be positive".into());
        }
        if let Some(min_mb) = self.min_mb
            && (!min_mb.is_finite() || min_mb < 0.0)
        {
            return fail(format!("min_mb must be a non-negative number, got {min_mb}"));
        }

        let mut source_ids = BTreeSet::new();
        for source in &self.sources {
            if !source_ids.insert(source.id.as_str()) {
                return fail(format!("duplicate source id '{}'", source.id));
            }
            if source.id.is_empty() || source.id.contains(['/', '\\']) || source.id == ".." {
                return fail(format!("invalid source id '{}'", source.id));
            }
            source.location()?;
        }

        if self.converters.is_empty() {
            return fail("no converters declared".into());
        }
        let mut backends = BTreeSet::new();
        for converter in &self.converters {
            let backend = converter.backend();
            if backend.trim().is_empty() {
                return fail("converter with empty backend id".into());
            }
            if !backends.insert(backend) {
                return fail(format!("backend '{backend}' declared twice"));
            }
            if converter.outputs().is_empty() {
                return fail(format!("backend '{backend}' declares no outputs"));
            }

            let mut relatives = BTreeSet::new();
            for output in converter.outputs() {
                check_relative_path(&output.relative)
                    .map_err(|reason| Error::Config(format!(
                        "model '{}': output '{}' {reason}",
                        self.id, output.relative
                    )))?;
                if !relatives.insert(output.relative.as_str()) {
                    return fail(format!("output '{}' declared twice", output.relative));
                }
                if let Some(min_mb) = output.min_mb
                    && (!min_mb.is_finite() || min_mb < 0.0)
                {
                    return fail(format!("output '{}': invalid min_mb", output.relative));
                }
                match converter {
                    ConverterSpec::Prebuilt(_) => match output.source.as_deref() {
                        Some(id) if source_ids.contains(id) => {}
                        Some(id) => return fail(format!("output '{}' uses unknown source '{id}'", output.relative)),
                        None => return fail(format!("prebuilt output '{}' needs a source", output.relative)),
                    },
                    ConverterSpec::Command(_) => {
                        if output.file.as_deref().is_none_or(str::is_empty) {
                            return fail(format!("command output '{}' needs a file", output.relative));
                        }
                    }
                }
                if let Some(file) = output.file.as_deref() {
                    check_relative_path(file).map_err(|reason| {
                        Error::Config(format!("model '{}': output file '{file}' {reason}", self.id))
                    })?;
                }
            }
        }

        if let Some(preferred) = self.backend.as_deref()
            && !backends.contains(preferred)
        {
            return fail(format!("preferred backend '{preferred}' has no converter"));
        }

        Ok(())
    }
}

/// Model ids name per-model work directories, so they must be a single
/// plain path segment.
fn check_model_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.trim().is_empty() {
        return Err("is empty");
    }
    if id.contains(['/', '\\']) {
        return Err("contains a path separator");
    }
    if id == "." || id == ".." {
        return Err("is a relative directory name");
    }
    Ok(())
}

/// Loads and validates the model source list.
///
/// The file is JSON unless its extension is `.toml`. Models come back sorted
/// by id, which is the processing order of the whole pipeline.
pub fn load_model_sources(path: &Path) -> Result<Vec<ModelDescriptor>> {
    if !path.exists() {
        return Err(Error::Config(format!("model source list not found: {}", path.display())));
    }
    let content = std::fs::read_to_string(path).fs_context("reading model source list", path)?;

    let parsed: BTreeMap<String, ModelDescriptor> =
        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        };

    let mut models = Vec::with_capacity(parsed.len());
    let mut stems: BTreeMap<String, String> = BTreeMap::new();
    for (id, mut model) in parsed {
        model.id = id;
        model.validate()?;
        if let Some(owner) = stems.insert(model.bundle_stem(), model.id.clone()) {
            return Err(Error::Config(format!(
                "models '{owner}' and '{}' both bundle as {}",
                model.id,
                model.bundle_name()
            )));
        }
        models.push(model);
    }

    log::debug!("Loaded {} model(s) from {}", models.len(), path.display());
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ModelDescriptor {
        let mut model: ModelDescriptor = serde_json::from_str(json).unwrap();
        model.id = "m".into();
        model
    }

    const BASE: &str = r#"{
        "name": "Model", "artifact": "model", "version": "v1",
        "sources": [{ "id": "w", "url": "https://example.com/dl/weights.bin?x=1" }],
        "converters": [
            { "kind": "command", "backend": "tflite", "program": "conv",
              "outputs": [{ "file": "m.tflite", "relative": "models/m.tflite" }] },
            { "kind": "prebuilt", "backend": "ncnn",
              "outputs": [{ "source": "w", "relative": "models/m.bin", "min_mb": 1.5 }] }
        ]
    }"#;

    #[test]
    fn defaults_and_validation() {
        let model = parse(BASE);
        model.validate().unwrap();
        assert!(model.enabled);
        assert_eq!(model.bundle_name(), "model_v1.zip");
        assert_eq!(model.sources[0].file_name(), "weights.bin");
        assert!(model.converters[0].outputs()[0].include);
    }

    #[test]
    fn preferred_backend_goes_first() {
        let mut model = parse(BASE);
        model.backend = Some("ncnn".into());
        let order: Vec<_> = model.converter_order().iter().map(|c| c.backend()).collect();
        assert_eq!(order, ["ncnn", "tflite"]);

        model.backend = Some("onnx".into());
        assert!(model.validate().is_err());
    }

    #[test]
    fn rejects_traversal_in_outputs() {
        let model = parse(&BASE.replace("models/m.bin", "../m.bin"));
        let err = model.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn precision_is_case_insensitive() {
        let model = parse(&BASE.replace("\"version\": \"v1\",", "\"version\": \"v1\", \"precision\": \"FP16\","));
        assert_eq!(model.precision, Some(Precision::Fp16));
        assert!("int4".parse::<Precision>().is_err());
    }

    #[test]
    fn github_locations() {
        let entry = SourceEntry {
            id: "code".into(),
            kind: SourceKind::Archive,
            url: None,
            repo: Some("org/repo".into()),
            commit: Some("abc123".into()),
            path: None,
            filename: None,
        };
        assert_eq!(
            entry.location().unwrap(),
            SourceLocation::Remote(Url::parse("https://codeload.github.com/org/repo/tar.gz/abc123").unwrap())
        );

        let file = SourceEntry {
            kind: SourceKind::File,
            path: Some("weights/model.pth".into()),
            ..entry
        };
        assert_eq!(file.file_name(), "model.pth");
        assert!(matches!(file.location().unwrap(), SourceLocation::Remote(u) if u.as_str().starts_with(RAW_GITHUB_BASE)));
    }

    fn write_sources(dir: &Path, json: serde_json::Value) -> PathBuf {
        let path = dir.join("model_sources.json");
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    fn minimal(artifact: &str) -> serde_json::Value {
        serde_json::json!({
            "name": "M", "artifact": artifact, "version": "v1",
            "sources": [{ "id": "w", "path": "w.bin" }],
            "converters": [{ "kind": "prebuilt", "backend": "ncnn",
                             "outputs": [{ "source": "w", "relative": "models/w.bin" }] }]
        })
    }

    #[test]
    fn shared_bundle_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_sources(
            tmp.path(),
            serde_json::json!({ "a": minimal("shared"), "b": minimal("shared") }),
        );
        let err = load_model_sources(&path).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("shared_v1.zip"), "{err}");

        let path = write_sources(
            tmp.path(),
            serde_json::json!({ "a": minimal("first"), "b": minimal("second") }),
        );
        assert_eq!(load_model_sources(&path).unwrap().len(), 2);
    }

    #[test]
    fn model_ids_must_be_plain_names() {
        let tmp = tempfile::tempdir().unwrap();
        for bad in ["../../victim", "a/b", "a\\b", "..", ".", ""] {
            let sources = serde_json::Map::from_iter([(bad.to_string(), minimal("m"))]);
            let path = write_sources(tmp.path(), serde_json::Value::Object(sources));
            let err = load_model_sources(&path).unwrap_err();
            assert!(err.is_config_error(), "{bad:?}: {err}");
        }
    }

    #[test]
    fn backend_metadata_ignores_case() {
        let model = parse(&BASE.replace(
            "\"sources\"",
            "\"metadata\": { \"NCNN\": { \"tile_size\": 256 } }, \"sources\"",
        ));
        assert_eq!(model.backend_metadata("ncnn").unwrap()["tile_size"], 256);
    }
}
