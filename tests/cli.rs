mod common;

use assert_cmd::Command;
use common::{Workspace, model_sources};
use predicates::prelude::*;

const PIPELINE_ENV: &[&str] = &[
    "MODELS_ROOT_DIR",
    "MODEL_SOURCES_FILE",
    "WORK_DIR",
    "MODELS_DIST",
    "MODELS_LOCK_PATH",
    "MODELS_RUNTIME_LOCK_PATH",
    "GITHUB_STEP_SUMMARY",
    "MODELS_RELEASE_TAG",
    "MODELS_CONTRACT_VERSION",
    "GITHUB_REPOSITORY",
    "MODELS_TOOL_TIMEOUT",
];

fn bundler(ws: &Workspace, step: &str) -> Command {
    let mut cmd = Command::cargo_bin("kodegen_bundler_models").unwrap();
    for var in PIPELINE_ENV {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "info")
        .arg(step)
        .arg("--root")
        .arg(ws.root())
        .arg("--sources")
        .arg(ws.sources_file())
        .arg("--work-dir")
        .arg(ws.root().join(".work"))
        .arg("--dist")
        .arg(ws.dist())
        .arg("--build-lock")
        .arg(ws.build_lock())
        .arg("--summary")
        .arg(ws.summary());
    cmd
}

#[test]
fn missing_source_list_exits_with_config_code() {
    let ws = Workspace::new();
    bundler(&ws, "prepare")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("model source list not found"));
}

#[test]
fn runtime_lock_without_build_lock_exits_with_config_code() {
    let ws = Workspace::new();
    std::fs::create_dir_all(ws.dist()).unwrap();
    bundler(&ws, "runtime-lock")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("build lock not found"));
    assert!(!ws.runtime_lock().exists());
}

#[test]
fn all_writes_every_artifact() {
    let ws = Workspace::new();
    ws.write_sources(&model_sources());

    bundler(&ws, "all")
        .arg("--release-tag")
        .arg("models-v9")
        .assert()
        .success()
        .stderr(predicate::str::contains("Runtime lock lists 2 model(s)"));

    assert!(ws.build_lock().is_file());
    assert!(ws.runtime_lock().is_file());
    assert!(ws.summary().is_file());
    let lock = std::fs::read_to_string(ws.build_lock()).unwrap();
    assert!(lock.contains("\"release\": \"models-v9\""));
}

#[test]
fn tampered_lock_exits_with_config_code() {
    let ws = Workspace::new();
    ws.write_sources(&model_sources());
    bundler(&ws, "prepare").assert().success();

    let lock = std::fs::read_to_string(ws.build_lock()).unwrap();
    std::fs::write(ws.build_lock(), lock.replace("\"alpha.bin\"", "\"../../alpha.bin\"")).unwrap();

    bundler(&ws, "runtime-lock").assert().code(2);
    assert!(!ws.runtime_lock().exists());
}

#[test]
fn only_with_runtime_lock_is_rejected() {
    let ws = Workspace::new();
    bundler(&ws, "runtime-lock")
        .arg("--only")
        .arg("alpha")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--only"));
}
