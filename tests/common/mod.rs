//! Shared fixtures: a project root with local model weights and a model
//! source list exercising preferred backends, fallback, excluded outputs,
//! runtime-unsupported backends and disabled models.

#![allow(dead_code)]

use kodegen_bundler_models::bundler::{Settings, SettingsBuilder};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MISSING_CONVERTER: &str = "kodegen-no-such-converter-7c1d";

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    /// A project root holding `weights/*` for every fixture model.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("weights");
        std::fs::create_dir_all(&weights).unwrap();

        write_pattern(&weights.join("alpha.bin"), 16 * 1024, 1);
        write_pattern(&weights.join("alpha.param"), 64, 2);
        std::fs::write(weights.join("alpha.notes.txt"), b"converted with defaults\n").unwrap();
        write_pattern(&weights.join("beta.bin"), 12 * 1024, 3);
        write_pattern(&weights.join("gamma.tflite"), 8 * 1024, 4);
        write_pattern(&weights.join("delta.bin"), 4 * 1024, 5);

        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn dist(&self) -> PathBuf {
        self.root().join("dist")
    }

    pub fn sources_file(&self) -> PathBuf {
        self.root().join("model_sources.json")
    }

    pub fn build_lock(&self) -> PathBuf {
        self.root().join("models.lock.json")
    }

    pub fn runtime_lock(&self) -> PathBuf {
        self.dist().join("models.lock.json")
    }

    pub fn summary(&self) -> PathBuf {
        self.root().join(".work/SUMMARY.md")
    }

    pub fn write_sources(&self, sources: &Value) -> PathBuf {
        let path = self.sources_file();
        std::fs::write(&path, serde_json::to_string_pretty(sources).unwrap()).unwrap();
        path
    }

    pub fn settings(&self, only: &[&str]) -> Settings {
        SettingsBuilder::new()
            .root_dir(self.root())
            .sources_file(self.sources_file())
            .work_dir(self.root().join(".work"))
            .dist_dir(self.dist())
            .build_lock_path(self.build_lock())
            .runtime_lock_path(self.runtime_lock())
            .summary_path(self.summary())
            .release_tag("models-v3")
            .contract_version("v1.4.1")
            .repository("acme/models")
            .only(only.iter().map(|s| s.to_string()).collect())
            .build()
            .unwrap()
    }
}

/// Deterministic non-trivial file content.
pub fn write_pattern(path: &Path, len: usize, seed: u8) {
    let data: Vec<u8> = (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    std::fs::write(path, data).unwrap();
}

/// Four models:
/// - `alpha`: ncnn, two shipped files and one excluded note
/// - `beta`: prefers a missing converter, falls back to ncnn
/// - `gamma`: tflite only, not loadable at runtime
/// - `delta`: ncnn but disabled
pub fn model_sources() -> Value {
    json!({
        "alpha": {
            "name": "Alpha Denoise",
            "artifact": "alpha",
            "version": "v1",
            "backend": "ncnn",
            "precision": "fp16",
            "min_mb": 0.001,
            "sources": [
                { "id": "bin", "path": "weights/alpha.bin" },
                { "id": "param", "path": "weights/alpha.param" },
                { "id": "notes", "path": "weights/alpha.notes.txt" }
            ],
            "converters": [{
                "kind": "prebuilt",
                "backend": "ncnn",
                "outputs": [
                    { "source": "bin", "relative": "models/alpha.bin", "label": "weights" },
                    { "source": "param", "relative": "models/alpha.param", "min_bytes": 16 },
                    { "source": "notes", "relative": "logs/alpha.txt", "include": false, "min_bytes": 1 }
                ]
            }]
        },
        "beta": {
            "name": "Beta Upscale",
            "artifact": "beta",
            "version": "v2",
            "backend": "tflite",
            "metadata": { "ncnn": { "tile_size": 256, "precision": "FP16" } },
            "sources": [{ "id": "bin", "path": "weights/beta.bin" }],
            "converters": [
                {
                    "kind": "command",
                    "backend": "tflite",
                    "program": MISSING_CONVERTER,
                    "args": ["{source:bin}", "{out_dir}/beta.tflite"],
                    "outputs": [{ "file": "beta.tflite", "relative": "models/beta.tflite" }]
                },
                {
                    "kind": "prebuilt",
                    "backend": "ncnn",
                    "outputs": [{ "source": "bin", "relative": "models/beta.bin" }]
                }
            ]
        },
        "gamma": {
            "name": "Gamma Mobile",
            "artifact": "gamma",
            "version": "v1",
            "backend": "tflite",
            "sources": [{ "id": "model", "path": "weights/gamma.tflite" }],
            "converters": [{
                "kind": "prebuilt",
                "backend": "tflite",
                "outputs": [{ "source": "model", "relative": "tflite/gamma.tflite" }]
            }]
        },
        "delta": {
            "name": "Delta Legacy",
            "artifact": "delta",
            "version": "v1",
            "backend": "ncnn",
            "enabled": false,
            "sources": [{ "id": "bin", "path": "weights/delta.bin" }],
            "converters": [{
                "kind": "prebuilt",
                "backend": "ncnn",
                "outputs": [{ "source": "bin", "relative": "models/delta.bin" }]
            }]
        }
    })
}
