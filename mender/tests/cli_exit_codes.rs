//! CLI tests for `mender` exit codes.
//!
//! Spawns the binary in a scratch directory (so no `mender.toml` is picked up)
//! and checks exit codes and the JSON printed on stdout.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use mender::exit_codes;
use mender::test_support::python_available;

fn mender(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mender"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn mender")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn check_allowed_program_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("ok.py"), "print(sum([1, 2, 3]))\n").expect("write");

    let output = mender(temp.path(), &["check", "ok.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout_json(&output)["allowed"], true);
}

#[test]
fn check_forbidden_program_exits_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("bad.py"),
        "import subprocess\neval('1 + 1')\n",
    )
    .expect("write");

    let output = mender(temp.path(), &["check", "bad.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    let json = stdout_json(&output);
    assert_eq!(json["allowed"], false);
    assert_eq!(json["violations"].as_array().map(Vec::len), Some(2));
}

#[test]
fn missing_file_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = mender(temp.path(), &["check", "nope.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.py"));
}

#[test]
fn malformed_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("mender.toml"), "[limits\n").expect("write");
    fs::write(temp.path().join("ok.py"), "print(1)\n").expect("write");
    let output = mender(temp.path(), &["check", "ok.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn empty_program_is_rejected_as_invalid_submission() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("empty.py"), "").expect("write");
    let output = mender(temp.path(), &["repair", "empty.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("code must not be empty"));
}

#[test]
fn classify_reads_stderr_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("err.txt"),
        "Traceback (most recent call last):\n  File \"<sandbox>\", line 3, in <module>\nZeroDivisionError: division by zero\n",
    )
    .expect("write");

    let output = mender(temp.path(), &["classify", "err.txt"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let json = stdout_json(&output);
    assert_eq!(json["kind"], "ZeroDivisionError");
    assert_eq!(json["line_number"], 3);
    assert_eq!(json["category"], "runtime");
}

#[test]
fn patch_prints_candidate_with_diff() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "print(x)\n").expect("write");
    fs::write(
        temp.path().join("err.txt"),
        "Traceback (most recent call last):\n  File \"<sandbox>\", line 1, in <module>\nNameError: name 'x' is not defined\n",
    )
    .expect("write");

    let output = mender(temp.path(), &["patch", "prog.py", "--stderr", "err.txt"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let json = stdout_json(&output);
    assert_eq!(json["rewritten_code"], "x = 0\nprint(x)\n");
    assert_eq!(json["confidence"], 0.8);
    assert_eq!(json["source"], "heuristic");
}

#[test]
fn patch_of_oversized_program_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("mender.toml"), "[limits]\nmax_code_length = 32\n")
        .expect("write config");
    fs::write(temp.path().join("prog.py"), "print(x)\n".repeat(10)).expect("write");
    fs::write(temp.path().join("err.txt"), "NameError: name 'x' is not defined\n")
        .expect("write");

    let output = mender(temp.path(), &["patch", "prog.py", "--stderr", "err.txt"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("limit is 32"));
    assert!(output.stdout.is_empty());
}

#[test]
fn apply_writes_patched_program_to_stdout() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "print(10 / 0)\n").expect("write");
    fs::write(
        temp.path().join("fix.diff"),
        "--- original\n+++ fixed\n@@ -1 +1 @@\n-print(10 / 0)\n+print(10 / 1)\n",
    )
    .expect("write");

    let output = mender(temp.path(), &["apply", "prog.py", "--diff", "fix.diff"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "print(10 / 1)\n");
}

#[test]
fn apply_with_mismatched_diff_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "print(1)\n").expect("write");
    fs::write(
        temp.path().join("fix.diff"),
        "@@ -1 +1 @@\n-print(2)\n+print(3)\n",
    )
    .expect("write");

    let output = mender(temp.path(), &["apply", "prog.py", "--diff", "fix.diff"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not match"));
}

#[test]
fn config_write_creates_loadable_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = mender(temp.path(), &["config", "--write"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let written = fs::read_to_string(temp.path().join("mender.toml")).expect("config");
    assert!(written.contains("[limits]"));
    assert!(written.contains("forbidden_imports"));
}

#[test]
fn repair_fixes_name_error_and_writes_log() {
    if !python_available() {
        eprintln!("skipping: python3 not available");
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "print(x)\n").expect("write");

    let output = mender(
        temp.path(),
        &["repair", "prog.py", "--log-dir", "logs"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let json = stdout_json(&output);
    assert_eq!(json["status"], "fixed");
    assert_eq!(json["current_code"], "x = 0\nprint(x)\n");

    let session_id = json["session_id"].as_str().expect("session id");
    let session_dir = temp.path().join("logs").join(session_id);
    assert!(session_dir.join("session.json").is_file());
    assert!(session_dir.join("1").join("patch.diff").is_file());
}

#[test]
fn repair_of_forbidden_program_exits_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "import os\nprint(os.getcwd())\n").expect("write");
    let output = mender(temp.path(), &["repair", "prog.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert_eq!(stdout_json(&output)["total_iterations"], 0);
}

#[test]
fn run_failure_exits_failed() {
    if !python_available() {
        eprintln!("skipping: python3 not available");
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "print(1 / 0)\n").expect("write");

    let output = mender(temp.path(), &["run", "prog.py", "--timeout", "5"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let json = stdout_json(&output);
    assert_eq!(json["status"], "runtime_error");
    assert!(
        json["stderr"]
            .as_str()
            .is_some_and(|s| s.contains("ZeroDivisionError"))
    );
}

#[test]
fn run_text_prints_summary() {
    if !python_available() {
        eprintln!("skipping: python3 not available");
        return;
    }
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prog.py"), "print('hello')\n").expect("write");

    let output = mender(temp.path(), &["run", "prog.py", "--text"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Status: success"));
    assert!(text.contains("hello"));
}
