mod common;

use assert_cmd::Command;
use common::TestConfigContext;
use predicates::prelude::*;

fn fstrans_cmd(ctx: &TestConfigContext) -> Command {
    let mut cmd = Command::new(common::get_fstrans_path());
    cmd.env("FSTRANS_CONFIG_DIR", &ctx.config_dir);
    cmd.env("FSTRANS_LOG", "warn");
    cmd
}

#[test]
fn test_stress_reports_clean_teardown() {
    let ctx = TestConfigContext::new();
    fstrans_cmd(&ctx)
        .args(["stress", "--threads", "3", "--iterations", "200", "--cycles", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("suspensions:    5"))
        .stdout(predicate::str::contains("All mount records released."));
}

#[test]
fn test_stress_json_output() {
    let ctx = TestConfigContext::new();
    let output = fstrans_cmd(&ctx)
        .args(["stress", "-t", "2", "-i", "50", "-c", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["threads"], 2);
    assert_eq!(report["suspensions"], 2);
    assert_eq!(report["flushes"], 2);
    assert_eq!(report["leaked_mount_infos"], 0);
}

#[test]
fn test_stress_uses_config_defaults() {
    let ctx = TestConfigContext::new();
    ctx.write_config("[stress]\nthreads = 1\niterations = 10\ncycles = 1\n");
    fstrans_cmd(&ctx)
        .arg("stress")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 threads x 10 iterations, 1 suspend cycles"));
}

#[test]
fn test_dump_shows_demo_topology() {
    let ctx = TestConfigContext::new();
    fstrans_cmd(&ctx)
        .arg("dump")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffs0"))
        .stdout(predicate::str::contains("suspending"))
        .stdout(predicate::str::contains("lazy"));
}

#[test]
fn test_dump_json_lists_alias() {
    let ctx = TestConfigContext::new();
    let output = fstrans_cmd(&ctx).args(["dump", "--json"]).output().unwrap();
    assert!(output.status.success());

    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let bindings = snapshot["bindings"].as_array().unwrap();
    assert!(bindings
        .iter()
        .any(|b| b["mount"] == "null0" && b["alias_of"] == "ffs0"));
    let mounts = snapshot["mounts"].as_array().unwrap();
    assert!(mounts
        .iter()
        .any(|m| m["mount"] == "ffs0" && m["state"] == "suspending" && m["cow_handlers"] == 1));
}

#[test]
fn test_config_path_command() {
    let ctx = TestConfigContext::new();
    fstrans_cmd(&ctx)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            ctx.config_dir.join("config.toml").to_string_lossy().to_string(),
        ));
}

#[test]
fn test_config_show_rejects_invalid_file() {
    let ctx = TestConfigContext::new();
    ctx.write_config("[wait]\nwait_recheck_ms = 0\n");
    fstrans_cmd(&ctx)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("wait_recheck_ms"));
}
