use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn lpy() -> Command {
    Command::cargo_bin("lpy-cli").expect("binary exists")
}

#[test]
fn runs_file_with_report_and_stamped_output() {
    let dir = tempdir().expect("tempdir");
    let input_path = dir.path().join("input.py");
    fs::write(&input_path, "def f(): 1 + 1\nprint(f(), 5)\n").expect("write input");

    lpy()
        .arg(&input_path)
        .arg("--fixed-timestamp")
        .arg("T")
        .assert()
        .success()
        .stdout(
            "--------------------\nvisit Num 1\nvisit Num 1\nvisit Num 5\n--------------------\nT 2 5\n",
        );
}

#[test]
fn default_stamp_uses_clock() {
    let dir = tempdir().expect("tempdir");
    let input_path = dir.path().join("input.py");
    fs::write(&input_path, "print(5)\n").expect("write input");

    lpy()
        .arg(&input_path)
        .arg("--no-report")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("print at ").and(predicate::str::ends_with(": -->  5\n")));
}

#[test]
fn reads_program_from_stdin() {
    lpy()
        .args(["--no-report", "--fixed-timestamp", "T"])
        .write_stdin("x = 2\nprint(x * 21)\n")
        .assert()
        .success()
        .stdout("T 42\n");
}

#[test]
fn dumps_rewritten_source_without_running() {
    lpy()
        .args(["--no-report", "--no-run", "--dump", "--fixed-timestamp", "T"])
        .write_stdin("def f(x):\n    print(x)\n")
        .assert()
        .success()
        .stdout("def f(x):\n    return print('T', x)\n");
}

#[test]
fn shares_globals_across_directory_inputs() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("a.py"), "total = 40\n").expect("write a");
    fs::write(dir.path().join("b.lpy"), "print(total + 2)\n").expect("write b");
    fs::write(dir.path().join("readme.md"), "not a program").expect("write readme");

    lpy()
        .arg(dir.path())
        .args(["--no-report", "--fixed-timestamp", "T"])
        .assert()
        .success()
        .stdout("T 42\n");
}

#[test]
fn writes_wasm_output() {
    let dir = tempdir().expect("tempdir");
    let input_path = dir.path().join("input.py");
    fs::write(&input_path, "print(1)\n").expect("write input");
    let output_path = dir.path().join("out/prog.wasm");

    lpy()
        .arg(&input_path)
        .arg("--no-run")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let wasm = fs::read(&output_path).expect("read wasm");
    assert!(wasm.starts_with(b"\0asm"), "not a wasm module");
}

#[test]
fn reports_compilation_error_with_location() {
    let dir = tempdir().expect("tempdir");
    let input_path = dir.path().join("bad.py");
    fs::write(&input_path, "x = 1\nreturn x\n").expect("write input");

    lpy()
        .arg(&input_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.py:2:0: compilation error"))
        .stderr(predicate::str::contains("'return' outside function"));
}

#[test]
fn prints_report_before_a_compilation_error() {
    lpy()
        .args(["--fixed-timestamp", "T"])
        .write_stdin("x = 1\nreturn x\n")
        .assert()
        .failure()
        .stdout("--------------------\nvisit Num 1\n--------------------\n")
        .stderr(predicate::str::contains("'return' outside function"));
}

#[test]
fn rejects_deeply_nested_expression() {
    let source = format!("x = {}1\n", "-".repeat(200_000));
    lpy()
        .args(["--no-report"])
        .write_stdin(source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("too many nested levels"));
}

#[test]
fn reports_parse_error() {
    lpy()
        .write_stdin("def (:\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to compile <stdin>"))
        .stderr(predicate::str::contains("parse error"));
}

#[test]
fn reports_runtime_fault_after_partial_output() {
    lpy()
        .args(["--no-report", "--fixed-timestamp", "T"])
        .write_stdin("print(1)\nprint(undefined_name)\n")
        .assert()
        .failure()
        .stdout("T 1\n")
        .stderr(predicate::str::contains("failed to run <stdin>"))
        .stderr(predicate::str::contains("name 'undefined_name' is not defined"));
}

#[test]
fn rejects_invalid_stamp_format() {
    lpy()
        .args(["--stamp-format", "%Q"])
        .write_stdin("print(1)\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid timestamp format"));
}

#[test]
fn reports_missing_input() {
    let dir = tempdir().expect("tempdir");
    lpy()
        .arg(dir.path().join("missing.py"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read input"));
}
