use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

#[allow(deprecated)]
fn docreg(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("docreg").expect("binary");
    cmd.arg("--root").arg(root).arg("--quiet");
    cmd
}

fn run_json(root: &Path, args: &[&str]) -> Value {
    let output = docreg(root).args(args).output().expect("command run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

fn setup_tree() -> tempfile::TempDir {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::write(root.join("a.mdc"), "# Alpha\n\nSee [b](b.mdc).\n").unwrap();
    fs::write(root.join("B.mdc"), "# Beta\n").unwrap();
    fs::write(root.join("c.mdc"), "# Gamma\n\n[x](nonexistent.mdc)\n").unwrap();
    temp
}

#[test]
fn status_on_empty_tree_is_all_zero() {
    let temp = tempdir().unwrap();
    let status = run_json(temp.path(), &["status"]);
    assert_eq!(
        status,
        serde_json::json!({
            "totalFiles": 0,
            "validFiles": 0,
            "corruptFiles": 0,
            "brokenLinks": 0,
            "healthScore": 0
        })
    );
}

#[test]
fn validate_repairs_and_persists() {
    let temp = setup_tree();
    let root = temp.path();

    let out = run_json(root, &["validate"]);
    assert_eq!(out["scan"]["processed"], 3);
    assert_eq!(out["validation"]["repaired"], 1);
    assert_eq!(out["validation"]["broken"], 1);

    let info = run_json(root, &["info", "a.mdc"]);
    assert_eq!(info["linksOut"][0]["path"], "B.mdc");
    assert_eq!(info["fixHistory"][0]["before"], "b.mdc");

    let status = run_json(root, &["status"]);
    assert_eq!(status["totalFiles"], 3);
    assert_eq!(status["brokenLinks"], 1);
    assert!(root.join(".docreg").join("registry.json").exists());
}

#[test]
#[cfg_attr(
    not(target_os = "linux"),
    ignore = "case-insensitive filesystems read b.mdc directly"
)]
fn read_heals_path_and_logs_access() {
    let temp = setup_tree();
    let root = temp.path();
    run_json(root, &["scan"]);

    let read = run_json(root, &["read", "b.mdc"]);
    assert_eq!(read["path"], "B.mdc");
    assert_eq!(read["content"], "# Beta\n");
    assert_eq!(read["repaired"]["confidence"], 1.0);

    let recent = run_json(root, &["recent", "-n", "1"]);
    assert_eq!(recent[0]["path"], "b.mdc");
    assert_eq!(recent[0]["operation"], "read_repaired");
}

#[test]
fn missing_file_fails_with_clear_message() {
    let temp = setup_tree();
    let root = temp.path();
    run_json(root, &["scan"]);

    docreg(root)
        .args(["read", "zzzz-unrelated.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "no repair candidate met the confidence threshold",
        ));

    let recent = run_json(root, &["recent"]);
    assert_eq!(recent[0]["operation"], "read_failed");
}

#[test]
fn files_list_and_markdown_report() {
    let temp = setup_tree();
    let root = temp.path();
    run_json(root, &["validate"]);

    docreg(root)
        .arg("files-list")
        .assert()
        .success()
        .stdout("B.mdc : [B.mdc](B.mdc)\na.mdc : [a.mdc](a.mdc)\nc.mdc : [c.mdc](c.mdc)\n");

    docreg(root)
        .args(["report", "--markdown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Broken Links"))
        .stdout(predicate::str::contains("`b.mdc` → `B.mdc`"));
}

#[test]
fn list_filters_by_status() {
    let temp = setup_tree();
    let root = temp.path();
    fs::write(root.join("broken.json"), "{ not json").unwrap();
    run_json(root, &["scan"]);

    let corrupt = run_json(root, &["list", "--status", "corrupt"]);
    let paths: Vec<&str> = corrupt
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["broken.json"]);
    assert!(corrupt[0]["error"].as_str().is_some());
}
