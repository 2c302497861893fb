// Reproducibility and CLI tests.
//
// These tests run the `patchc` binary on the JSON fixtures and verify exit
// codes, emitted artifacts, and byte-identical output across runs.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn patchc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_patchc"))
}

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn run(args: &[&str]) -> Output {
    Command::new(patchc_binary())
        .args(args)
        .output()
        .expect("failed to run patchc")
}

fn run_ok(args: &[&str]) -> String {
    let output = run(args);
    assert!(
        output.status.success(),
        "patchc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

// ── Determinism ─────────────────────────────────────────────────────────────

#[test]
fn same_patch_identical_ir() {
    let patch = fixture("pulse.json");
    let first = run_ok(&["--emit", "ir", &patch]);
    let second = run_ok(&["--emit", "ir", &patch]);
    assert_eq!(first, second, "IR output should be byte-identical across runs");
    assert!(!first.is_empty());
}

#[test]
fn same_patch_identical_build_info() {
    let patch = fixture("pulse.json");
    let first = run_ok(&["--emit", "build-info", &patch]);
    let second = run_ok(&["--emit", "build-info", &patch]);
    assert_eq!(first, second);

    let info: serde_json::Value = serde_json::from_str(&first).expect("build-info is JSON");
    assert_eq!(info["manifest_schema_version"], 1);
    for key in ["patch_hash", "registry_fingerprint"] {
        let hex = info[key].as_str().unwrap_or_default();
        assert_eq!(hex.len(), 64, "{} should be a SHA-256 hex digest", key);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn registry_changes_fingerprint_not_patch_hash() {
    let patch = fixture("gain.json");
    let manifest = fixture("gain_manifest.json");
    let plain: serde_json::Value =
        serde_json::from_str(&run_ok(&["--emit", "build-info", &patch])).unwrap();
    let extended: serde_json::Value = serde_json::from_str(&run_ok(&[
        "--emit",
        "build-info",
        &patch,
        "-r",
        &manifest,
    ]))
    .unwrap();
    assert_eq!(plain["patch_hash"], extended["patch_hash"]);
    assert_ne!(plain["registry_fingerprint"], extended["registry_fingerprint"]);
}

#[test]
fn ir_json_has_program_and_tables() {
    let ir: serde_json::Value =
        serde_json::from_str(&run_ok(&["--emit", "ir", &fixture("pulse.json")])).unwrap();
    assert_eq!(ir["program"]["timeModel"]["kind"], "cyclic");
    assert_eq!(ir["busIds"], serde_json::json!(["energy"]));
    assert!(ir["program"]["schedule"].as_array().is_some_and(|s| !s.is_empty()));
    assert!(ir["inputs"].as_array().is_some_and(|s| !s.is_empty()));
}

// ── Manifests ───────────────────────────────────────────────────────────────

#[test]
fn manifest_block_compiles() {
    let out = run_ok(&[
        "--emit",
        "ir",
        &fixture("gain.json"),
        "--registry",
        &fixture("gain_manifest.json"),
    ]);
    let ir: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(ir["program"]["timeModel"]["kind"], "finite");
}

#[test]
fn unknown_block_without_manifest_fails() {
    let output = run(&["--emit", "ir", &fixture("gain.json")]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("E0104"), "stderr: {}", stderr);
    assert!(output.stdout.is_empty());
}

// ── Exit codes and emit targets ─────────────────────────────────────────────

#[test]
fn illegal_cycle_exits_one_with_diagnostics_json() {
    let output = run(&["--emit", "diagnostics", &fixture("illegal_cycle.json")]);
    assert_eq!(output.status.code(), Some(1));
    let diags: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let diags = diags.as_array().expect("array of diagnostics");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0]["code"], "E0400");
    assert_eq!(diags[0]["level"], "error");
    assert_eq!(diags[0]["locator"]["block"], "A");
}

#[test]
fn graph_emit_marks_illegal_cycle() {
    let output = run(&["--emit", "graph", &fixture("illegal_cycle.json")]);
    assert_eq!(output.status.code(), Some(1));
    let dot = String::from_utf8_lossy(&output.stdout);
    assert!(dot.starts_with("digraph patch {"));
    assert!(dot.contains("illegal cycle"));
}

#[test]
fn output_flag_writes_file() {
    let dir = std::env::temp_dir().join(format!("patchc-repro-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let out_path = dir.join("pulse.ir.json");
    let out_str = out_path.to_string_lossy().into_owned();
    let stdout = run_ok(&["--emit", "ir", &fixture("pulse.json"), "-o", &out_str]);
    assert!(stdout.is_empty());
    let written = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(written, run_ok(&["--emit", "ir", &fixture("pulse.json")]).trim_end());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_patch_is_cli_error() {
    let output = run(&["--emit", "ir", "/nonexistent/patch.json"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("patchc: error: /nonexistent/patch.json"), "{}", stderr);
}

#[test]
fn require_bus_publishers_flag_fails_silent_bus() {
    let dir = std::env::temp_dir().join(format!("patchc-silent-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let patch = dir.join("silent.json");
    std::fs::write(
        &patch,
        r#"{ "blocks": [ { "id": "clock", "type": "CycleTimeRoot" } ],
             "buses": [ { "id": "energy", "type": "Signal<float>", "default": 0.0 } ] }"#,
    )
    .unwrap();
    let patch = patch.to_string_lossy().into_owned();

    assert!(run(&["--emit", "ir", &patch]).status.success());
    let strict = run(&["--emit", "ir", "--require-bus-publishers", &patch]);
    assert_eq!(strict.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&strict.stderr).contains("W0500"));
    let _ = std::fs::remove_dir_all(&dir);
}
