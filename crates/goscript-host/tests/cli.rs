use std::io::Write as _;
use std::process::{Command, Stdio};

use serde_json::{json, Value};

const ECHO: &str = "func goscript(args ...interface{}) (interface{}, error) {\n\treturn args, nil\n}\n";

fn goscript() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_goscript"));
    cmd.env_remove("GOSCRIPT_LOG");
    cmd
}

fn with_echo_worker(cmd: &mut Command) -> &mut Command {
    cmd.arg("--backend-cmd")
        .arg(env!("CARGO_BIN_EXE_goscript-echo-worker"))
        .env("GOSCRIPT_ECHO_MODE", "echo")
}

fn json_lines(out: &std::process::Output) -> Vec<Value> {
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("parse stdout JSON line"))
        .collect()
}

#[test]
fn print_harness_emits_the_program() {
    let out = goscript()
        .args(["--code", ECHO, "--print-harness"])
        .output()
        .expect("run goscript");
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let program = String::from_utf8_lossy(&out.stdout);
    assert!(program.starts_with("// Code generated by goscript; DO NOT EDIT."));
    assert!(program.contains(ECHO));
    assert!(program.contains("return goscript(args...)"));
}

#[test]
fn each_call_flag_prints_one_report() {
    let out = with_echo_worker(&mut goscript())
        .args(["--code", ECHO])
        .args(["--call", r#"["Hello", "Mat"]"#])
        .args(["--call", r#"[1, {"$bytes": "aGk="}]"#])
        .args(["--call", r#"["fail"]"#])
        .output()
        .expect("run goscript");
    assert_eq!(
        out.status.code(),
        Some(1),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let reports = json_lines(&out);
    assert_eq!(
        reports,
        vec![
            json!({"ok": true, "value": ["Hello", "Mat"]}),
            json!({"ok": true, "value": [1, {"$bytes": "aGk="}]}),
            json!({"ok": false, "error": "requested failure"}),
        ]
    );
}

#[test]
fn no_call_flag_runs_once_without_arguments() {
    let out = with_echo_worker(&mut goscript())
        .args(["--code", ECHO])
        .output()
        .expect("run goscript");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(json_lines(&out), vec![json!({"ok": true, "value": []})]);
}

#[test]
fn lines_mode_calls_once_per_line() {
    let mut child = with_echo_worker(&mut goscript())
        .args(["--code", ECHO, "--lines"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn goscript");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"main.go\nREADME.md\n")
        .expect("write stdin");
    let out = child.wait_with_output().expect("wait goscript");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(
        json_lines(&out),
        vec![
            json!({"ok": true, "value": ["main.go"]}),
            json!({"ok": true, "value": ["README.md"]}),
        ]
    );
}

#[test]
fn script_file_is_read_from_disk() {
    let dir = std::env::temp_dir().join(format!("goscript_cli_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("echo.goscript");
    std::fs::write(&path, ECHO).unwrap();

    let out = with_echo_worker(&mut goscript())
        .arg("--script")
        .arg(&path)
        .args(["--call", "[true]"])
        .output()
        .expect("run goscript");
    std::fs::remove_dir_all(&dir).unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(json_lines(&out), vec![json!({"ok": true, "value": [true]})]);
}

#[test]
fn construction_errors_exit_2() {
    let out = with_echo_worker(&mut goscript())
        .args(["--code", "func main() {}"])
        .output()
        .expect("run goscript");
    assert_eq!(out.status.code(), Some(2));
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("missing func goscript"), "{stderr}");
}

#[test]
fn bad_call_json_exits_2() {
    let out = with_echo_worker(&mut goscript())
        .args(["--code", ECHO, "--call", r#"{"not": "an array"}"#])
        .output()
        .expect("run goscript");
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("must be a JSON array"), "{stderr}");
}

#[test]
fn script_and_code_are_exclusive() {
    let out = goscript()
        .args(["--code", ECHO, "--script", "x.go"])
        .output()
        .expect("run goscript");
    assert_eq!(out.status.code(), Some(2));
}
