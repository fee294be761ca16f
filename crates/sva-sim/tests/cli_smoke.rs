use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

const CAMPAIGN: &str = r#"
truth:
  name: linear
  params:
    weights: [1.0, -0.5]
    bias: 0.25
n_input_dim: 2
experimental_domain:
  lower: [0.0, 0.0]
  upper: [1.0, 1.0]
noise:
  kind: scalar
  scale: 0.01
noise_seed: 7
initial:
  n: 4
  seed: 3
loop:
  budget: 2
  progress: false
  optimizer:
    num_restarts: 2
    raw_samples: 16
"#;

fn sva_sim(args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_sva-sim"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn sva-sim");
    assert!(
        output.status.success(),
        "sva-sim {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("json on stdout")
}

fn write_campaign(dir: &Path) -> String {
    let path = dir.join("input.yaml");
    fs::write(&path, CAMPAIGN).expect("write campaign");
    path.to_string_lossy().into_owned()
}

#[test]
fn run_then_resume_then_inspect() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = write_campaign(tmp.path());
    let out = tmp.path().join("out");
    let out_arg = out.to_string_lossy().into_owned();

    let summary = stdout_json(&sva_sim(&["run", "--config", &config, "--out", &out_arg]));
    assert_eq!(summary["iterations_run"], 2);
    assert_eq!(summary["n_observations"], 6);
    for artifact in ["experiment.json", "experiment_history.bin", "campaign.yaml", "summary.json"] {
        assert!(out.join(artifact).exists(), "missing {artifact}");
    }

    let resumed = stdout_json(&sva_sim(&["resume", "--dir", &out_arg, "--budget", "1"]));
    assert_eq!(resumed["first_iteration"], 2);
    assert_eq!(resumed["last_iteration"], 2);
    assert_eq!(resumed["n_observations"], 7);

    let report = stdout_json(&sva_sim(&["inspect", "--dir", &out_arg]));
    assert_eq!(report["truth"], "linear");
    assert_eq!(report["n_records"], 3);
    assert_eq!(report["last_iteration"], 2);
    assert_eq!(report["best"]["x"].as_array().map(Vec::len), Some(2));
    assert!(report["warnings"].as_array().is_some_and(Vec::is_empty));
}

#[test]
fn version_reports_package_version() {
    let output = sva_sim(&["version"]);
    let printed = String::from_utf8_lossy(&output.stdout);
    assert_eq!(printed.trim(), env!("CARGO_PKG_VERSION"));

    let long = stdout_json(&sva_sim(&["version", "--long"]));
    assert_eq!(long["record_schema"]["major"], 1);
    assert_eq!(long["artifacts"][0], "experiment.json");
}

#[test]
fn run_rejects_unknown_truth() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("bad.yaml");
    fs::write(&path, CAMPAIGN.replace("name: linear", "name: nonexistent")).expect("write");
    let output = Command::new(env!("CARGO_BIN_EXE_sva-sim"))
        .args(["run", "--config"])
        .arg(&path)
        .arg("--out")
        .arg(tmp.path().join("out"))
        .output()
        .expect("spawn sva-sim");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown-truth"));
}
