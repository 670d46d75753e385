#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

const ONLY_FAKE: &str = r#"
general:
  timeout_secs: 30
providers:
  ollama: { enabled: false }
  claude: { enabled: false }
  codex: { enabled: false }
  gemini: { enabled: false }
  goose: { enabled: false }
  opencode: { enabled: false }
  llamacpp: { enabled: false }
  vllm: { enabled: false }
"#;

/// Temp config, database, home and an empty search path, so real CLIs on the host never
/// interfere.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new(config: &str) -> Self {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.yaml"), config).unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("mrbench").unwrap();
        cmd.env_remove("MRBENCH_CONFIG")
            .env_remove("MRBENCH_DB")
            .env("PATH", self.path("bin"))
            .env("HOME", self.dir.path())
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(self.path("config.yaml"))
            .arg("--db")
            .arg(self.path("mrbench.db"));
        cmd
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn suite(sb: &Sandbox) -> PathBuf {
    sb.write(
        "suite.yaml",
        "name: smoke\nprompts:\n  - id: greet\n    text: Say hello\n  - id: sum\n    text: What is 2 + 2?\n",
    )
}

#[test]
fn version_prints_package_version() {
    Command::cargo_bin("mrbench")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("mrbench "));
}

#[test]
fn providers_lists_only_enabled_adapters() {
    let sb = Sandbox::new(ONLY_FAKE);
    let out = sb.cmd().args(["providers", "--json"]).output().unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    let names: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["fake"]);
    assert_eq!(v[0]["capabilities"]["streaming"], Value::Bool(true));
}

#[test]
fn detect_save_then_models() {
    let sb = Sandbox::new(ONLY_FAKE);
    let out = sb.cmd().args(["detect", "--json", "--save"]).output().unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v[0]["provider"], "fake");
    assert_eq!(v[0]["result"]["detected"], Value::Bool(true));

    sb.cmd()
        .args(["models", "fake"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fake-slow"));
}

#[test]
fn run_with_prompt_file_succeeds() {
    let sb = Sandbox::new(ONLY_FAKE);
    let prompt = sb.write("prompt.txt", "ping\n");
    sb.cmd()
        .args(["run", "--provider", "fake", "--prompt"])
        .arg(&prompt)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Fake response to: ping"));
}

#[test]
fn run_routes_when_no_provider_given() {
    let sb = Sandbox::new(ONLY_FAKE);
    let out = sb
        .cmd()
        .args(["run", "--json"])
        .write_stdin("hello from stdin")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0));
    let v = stdout_json(&out);
    assert_eq!(v["job"]["provider"], "fake");
    assert_eq!(v["job"]["model"], "fake-fast");
    assert_eq!(v["status"], "completed");
}

#[test]
fn failed_job_exits_one() {
    let sb = Sandbox::new(ONLY_FAKE);
    let prompt = sb.write("prompt.txt", "ping");
    sb.cmd()
        .args(["run", "--provider", "fake", "--model", "fake-error", "--prompt"])
        .arg(&prompt)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Simulated error"));
}

#[test]
fn unknown_provider_exits_three_without_a_run() {
    let sb = Sandbox::new(ONLY_FAKE);
    let prompt = sb.write("prompt.txt", "ping");
    sb.cmd()
        .args(["run", "--provider", "nope", "--prompt"])
        .arg(&prompt)
        .assert()
        .code(3);

    let out = sb.cmd().args(["runs", "--json"]).output().unwrap();
    assert!(out.status.success());
    assert_eq!(stdout_json(&out).as_array().unwrap().len(), 0);
}

#[test]
fn nothing_eligible_exits_three() {
    let sb = Sandbox::new(&format!("{ONLY_FAKE}  fake: {{ enabled: false }}\n"));
    sb.cmd()
        .args(["route", "--explain"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no eligible provider"));
}

#[test]
fn route_picks_fake_offline() {
    let sb = Sandbox::new(ONLY_FAKE);
    sb.cmd()
        .args(["route", "--offline-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fake fake-fast"));
}

#[test]
fn bench_records_run_report_and_artifacts() {
    let sb = Sandbox::new(ONLY_FAKE);
    let suite = suite(&sb);
    let out_dir = sb.path("out");

    let out = sb
        .cmd()
        .args(["bench", "--json", "--provider", "fake", "--suite"])
        .arg(&suite)
        .arg("--output-dir")
        .arg(&out_dir)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    let outcome = stdout_json(&out);
    let run_id = outcome["run_id"].as_str().unwrap().to_string();
    assert_eq!(outcome["jobs"].as_array().unwrap().len(), 2);
    assert!(String::from_utf8_lossy(&out.stderr).contains("[2/2] fake"));
    assert!(out_dir.join(&run_id).join("run_meta.json").exists());

    let runs = sb.cmd().args(["runs", "--json"]).output().unwrap();
    let runs = stdout_json(&runs);
    assert_eq!(runs[0]["id"], run_id.as_str());
    assert_eq!(runs[0]["status"], "completed");

    let report = sb
        .cmd()
        .args(["report", "--json", run_id.as_str()])
        .output()
        .unwrap();
    assert!(report.status.success());
    let report = stdout_json(&report);
    assert_eq!(report["providers"][0]["total"], 2);
    assert_eq!(report["providers"][0]["success_rate"], 1.0);

    sb.cmd()
        .args(["report", run_id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("# Run {run_id}")));
}

#[test]
fn bench_with_failing_model_exits_one() {
    let sb = Sandbox::new(ONLY_FAKE);
    let suite = suite(&sb);
    sb.cmd()
        .args(["bench", "--provider", "fake", "--model", "fake=fake-error", "--suite"])
        .arg(&suite)
        .arg("--output-dir")
        .arg(sb.path("out"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("0 completed, 2 failed"));
}

#[test]
fn missing_explicit_config_exits_two() {
    let sb = Sandbox::new(ONLY_FAKE);
    Command::cargo_bin("mrbench")
        .unwrap()
        .env_remove("MRBENCH_CONFIG")
        .args(["providers", "--config"])
        .arg(sb.path("absent.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn invalid_suite_exits_two() {
    let sb = Sandbox::new(ONLY_FAKE);
    let suite = sb.write("empty.yaml", "name: empty\nprompts: []\n");
    sb.cmd()
        .args(["bench", "--provider", "fake", "--suite"])
        .arg(&suite)
        .arg("--output-dir")
        .arg(sb.path("out"))
        .assert()
        .code(2);
}

#[test]
fn discover_reports_every_known_tool() {
    let sb = Sandbox::new(ONLY_FAKE);
    let out = sb.cmd().args(["discover", "--json"]).output().unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    let tools = v["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 21);
    assert!(tools.iter().all(|t| t["binary_path"].is_null()));
    assert!(tools.iter().all(|t| t["status"] == "not_found"));
    assert_eq!(v["buckets"]["not_found"].as_array().unwrap().len(), 21);
    assert_eq!(v["buckets"]["installed"], serde_json::json!([]));
}

#[cfg(unix)]
#[test]
fn discover_sorts_tools_into_buckets() {
    use std::os::unix::fs::PermissionsExt;

    let sb = Sandbox::new(ONLY_FAKE);
    let gh = sb.write("bin/gh", "#!/bin/sh\n[ \"$1\" = auth ] && exit 0\nexit 1\n");
    fs::set_permissions(&gh, fs::Permissions::from_mode(0o755)).unwrap();
    let aider = sb.write("bin/aider", "#!/bin/sh\nexit 0\n");
    fs::set_permissions(&aider, fs::Permissions::from_mode(0o755)).unwrap();
    fs::create_dir_all(sb.path(".config/gh")).unwrap();

    let out = sb.cmd().args(["discover", "--json"]).output().unwrap();
    let v = stdout_json(&out);
    assert_eq!(v["buckets"]["installed"], serde_json::json!(["aider", "gh"]));
    assert_eq!(v["buckets"]["configured"], serde_json::json!(["gh"]));
    assert_eq!(v["buckets"]["ready"], serde_json::json!([]));

    let out = sb
        .cmd()
        .args(["discover", "--json", "--check-auth"])
        .output()
        .unwrap();
    let v = stdout_json(&out);
    assert_eq!(v["buckets"]["ready"], serde_json::json!(["gh"]));
    let gh = v["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "gh")
        .unwrap();
    assert_eq!(gh["status"], "ready");
    assert_eq!(gh["auth_status"], "authenticated");

    sb.cmd()
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 of 21 known tools (1 configured, 0 ready)"));
}

#[test]
fn doctor_reports_host_and_provider_status() {
    let sb = Sandbox::new(ONLY_FAKE);
    let out = sb.cmd().args(["doctor", "--json"]).output().unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["host"]["os"], std::env::consts::OS);
    let providers = v["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["name"], "fake");
    assert_eq!(providers[0]["detected"], Value::Bool(true));

    sb.cmd()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("1/1 providers available"));
}
