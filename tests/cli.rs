use assert_cmd::Command;
use kernel_cfg::ir::{IrBuilder, OffloadedTaskType};
use kernel_cfg::pipeline::Kernel;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn kernel(name: &str) -> Kernel {
    let mut b = IrBuilder::new();
    b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
        b.while_loop(|b, _| {
            let c = b.const_bool(true);
            b.if_then(c, |b| {
                b.func_return_cont(task, 2);
            });
        });
    });
    Kernel {
        name: name.to_string(),
        ir: b.finish(),
    }
}

fn write_json<T: serde::Serialize>(dir: &Path, file: &str, value: &T) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
    path
}

fn kernel_cfg() -> Command {
    Command::cargo_bin("kernel-cfg").unwrap()
}

#[test]
fn test_dump_prints_ir() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("saxpy"));
    kernel_cfg()
        .arg("dump")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("// saxpy"))
        .stdout(predicate::str::contains("offloaded range_for {"))
        .stdout(predicate::str::contains("(function return)"));
}

#[test]
fn test_normalize_writes_lowered_kernel() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("k"));
    let output = dir.path().join("out.json");
    kernel_cfg()
        .arg("normalize")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stderr(predicate::str::contains("k: lowered"));

    let lowered: Kernel =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert!(lowered.ir.validate().is_ok());
    assert_ne!(lowered.ir, kernel("k").ir);
}

#[test]
fn test_normalize_text_output() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("k"));
    kernel_cfg()
        .args(["normalize", "--text"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("alloca u1"))
        .stdout(predicate::str::contains("(function return)").not());
}

#[test]
fn test_cfg_json_for_several_kernels() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "ks.json", &vec![kernel("a"), kernel("b")]);
    let assert = kernel_cfg()
        .args(["cfg", "--format", "json"])
        .arg(&input)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let reports: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["name"], "a");
    assert_eq!(reports[1]["name"], "b");
    assert_eq!(reports[0]["start_node"], 0);
    assert_eq!(reports[0]["modified"], true);
    assert!(reports[0]["warnings"].as_array().unwrap().is_empty());
}

#[test]
fn test_cfg_without_lowering_reports_warning() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("k"));
    kernel_cfg()
        .args(["cfg", "--no-normalize"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Kernel k"))
        .stdout(predicate::str::contains("Warning: function-return unwind"));
}

#[test]
fn test_cfg_writes_dot_file() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("k"));
    let dot = dir.path().join("k.dot");
    kernel_cfg()
        .arg("cfg")
        .arg(&input)
        .arg("--dot")
        .arg(&dot)
        .assert()
        .success();
    let text = std::fs::read_to_string(&dot).unwrap();
    assert!(text.starts_with("digraph CFG {"));
    assert!(text.contains("label=\"continue\""));
}

#[test]
fn test_config_file_disables_lowering() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("k"));
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{ "structure_exits": false }"#).unwrap();
    kernel_cfg()
        .arg("cfg")
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Lowered non-local exits").not());
}

#[test]
fn test_malformed_input_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("bad.json");
    std::fs::write(&input, "{ \"name\": 1 }").unwrap();
    kernel_cfg()
        .arg("dump")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON error"));
}

#[test]
fn test_unknown_format_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "k.json", &kernel("k"));
    kernel_cfg()
        .args(["cfg", "--format", "yaml"])
        .arg(&input)
        .assert()
        .failure();
}

#[test]
fn test_cfg_help_lists_formats() {
    kernel_cfg()
        .args(["cfg", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("possible values: text, json"));
}
