use std::sync::Arc;

use goscript_host::script::STDERR_CAP;
use goscript_host::{
    CommandBackend, Response, Script, ScriptConfig, ScriptErrorKind, TypeRegistry, Value,
};

const ECHO: &str = "func goscript(args ...interface{}) (interface{}, error) {\n\treturn args, nil\n}\n";

fn worker(mode: &str) -> CommandBackend {
    CommandBackend::new(env!("CARGO_BIN_EXE_goscript-echo-worker")).env("GOSCRIPT_ECHO_MODE", mode)
}

fn echo_script() -> Script {
    let script = Script::new(ECHO, &ScriptConfig::new(worker("echo")));
    assert!(script.error().is_none(), "start: {:?}", script.error());
    script
}

#[test]
fn echo_round_trip() {
    let script = echo_script();
    assert!(script.is_ready());
    assert!(script.pid().is_some());
    assert_eq!(script.signature_line(), Some(1));
    assert_eq!(script.snippet_lines(), 3);
    assert_eq!(script.args().len(), 1);
    assert!(script.args()[0].variadic);

    let args = vec![Value::from("Mat"), Value::Int(42), Value::Bool(true)];
    let resp = script.call(&args).expect("call");
    assert_eq!(resp, Response::ok(Value::List(args)));

    let value = script.execute(&[Value::from("again")]).expect("execute");
    assert_eq!(value, Value::List(vec![Value::from("again")]));
}

#[test]
fn zero_arguments_are_an_empty_request() {
    let script = echo_script();
    assert_eq!(script.execute(&[]).unwrap(), Value::List(Vec::new()));
}

#[test]
fn call_errors_leave_the_instance_usable() {
    let script = echo_script();

    let resp = script.call(&[Value::from("fail")]).unwrap();
    assert_eq!(resp.error.as_deref(), Some("requested failure"));

    let err = script.execute(&[Value::from("fail")]).unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Call);
    assert!(err.is_call_error());
    assert_eq!(err.to_string(), "requested failure");

    assert_eq!(
        script.execute(&[Value::Int(1)]).unwrap(),
        Value::List(vec![Value::Int(1)])
    );
}

#[test]
fn child_exit_during_call_reports_its_stderr() {
    let script = echo_script();
    let err = script.execute(&[Value::from("exit")]).unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Process);
    assert_eq!(err.exit_code, Some(3));
    assert!(err.message.contains("exiting on request"), "{}", err.message);

    let again = script.execute(&[Value::from("x")]).unwrap_err();
    assert_eq!(again.kind, ScriptErrorKind::Process);
}

#[test]
fn crash_after_heavy_logging_keeps_the_panic() {
    let script = echo_script();
    let err = script.execute(&[Value::from("flood")]).unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Process);
    assert_eq!(err.exit_code, Some(3));
    assert!(err.message.len() <= STDERR_CAP);
    assert!(
        err.message.trim_end().ends_with("panic: flood finished"),
        "{}",
        &err.message[err.message.len().saturating_sub(200)..]
    );
}

#[test]
fn crash_report_leaves_out_earlier_calls_output() {
    let script = echo_script();
    assert_eq!(
        script.execute(&[Value::from("log")]).unwrap(),
        Value::List(vec![Value::from("log")])
    );
    // Let the stderr reader catch up with the chatter before the next call.
    std::thread::sleep(std::time::Duration::from_millis(200));

    let err = script.execute(&[Value::from("exit")]).unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Process);
    assert!(err.message.contains("exiting on request"), "{}", err.message);
    assert!(!err.message.contains("chatter"), "{}", err.message);
}

#[test]
fn close_is_idempotent_and_later_calls_fail() {
    let script = echo_script();
    let source = script.source_path().unwrap().to_path_buf();
    let dir = source.parent().unwrap().to_path_buf();
    assert!(source.is_file());

    script.close();
    script.close();
    assert!(!script.is_ready());
    assert!(!dir.exists(), "work dir left behind: {}", dir.display());

    let err = script.call(&[]).unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Closed);
}

#[test]
fn drop_cleans_up_the_work_dir() {
    let script = echo_script();
    let dir = script.source_path().unwrap().parent().unwrap().to_path_buf();
    drop(script);
    assert!(!dir.exists());
}

#[test]
fn work_dir_honors_temp_root() {
    let root = std::env::temp_dir().join(format!("goscript_root_{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let config = ScriptConfig::new(worker("echo")).with_temp_root(&root);
    let script = Script::new(ECHO, &config);
    let source = script.source_path().unwrap().to_path_buf();
    assert!(source.starts_with(&root));
    assert_eq!(source.file_name().unwrap(), "goscript.go");
    let program = std::fs::read_to_string(&source).unwrap();
    assert!(program.contains(ECHO));

    script.close();
    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn missing_entry_point_never_spawns() {
    let script = Script::new("func main() {}\n", &ScriptConfig::new(worker("echo")));
    let err = script.error().cloned().unwrap();
    assert_eq!(err.kind, ScriptErrorKind::Signature);
    assert_eq!(err.to_string(), "missing func goscript");
    assert!(script.pid().is_none());
    assert_eq!(script.execute(&[]).unwrap_err(), err);
}

#[test]
fn startup_diagnostics_are_remapped_to_the_snippet() {
    let script = Script::new(ECHO, &ScriptConfig::new(worker("compile-error")));
    let err = script.error().unwrap();
    assert_eq!(err.kind, ScriptErrorKind::Startup);
    assert_eq!(err.exit_code, Some(2));
    assert_eq!(err.message, "goscript:1:10: undefined: x");
    assert!(!err.message.contains("goscript.go"));

    let again = script.call(&[]).unwrap_err();
    assert_eq!(&again, err);
}

#[test]
fn exit_before_handshake_is_a_startup_error() {
    let script = Script::new(ECHO, &ScriptConfig::new(worker("exit-clean")));
    let err = script.error().unwrap();
    assert_eq!(err.kind, ScriptErrorKind::Startup);
    assert_eq!(err.exit_code, Some(0));
    assert!(
        err.message.starts_with("goscript exited before the handshake"),
        "{}",
        err.message
    );
    assert!(!err.message.contains("generated code"), "{}", err.message);
}

#[test]
fn failure_inside_generated_code_still_explains_itself() {
    let script = Script::new(ECHO, &ScriptConfig::new(worker("harness-error")));
    let err = script.error().unwrap();
    assert_eq!(err.kind, ScriptErrorKind::Startup);
    assert_eq!(err.exit_code, Some(2));
    assert!(err.message.contains("exited before the handshake"), "{}", err.message);
    assert!(err.message.contains("generated code"), "{}", err.message);
    assert!(!err.message.contains("goscript.go"), "{}", err.message);
}

#[test]
fn wrong_handshake_token_fails_to_start() {
    let script = Script::new(ECHO, &ScriptConfig::new(worker("bad-ready")));
    let err = script.error().unwrap();
    assert_eq!(err.kind, ScriptErrorKind::Startup);
    assert_eq!(err.message, "goscript failed to start");
}

#[test]
fn registered_types_cross_the_channel() {
    let registry = TypeRegistry::new().with("point").unwrap();
    let backend = worker("echo").env("GOSCRIPT_ECHO_TYPES", "point");
    let script = Script::new(ECHO, &ScriptConfig::new(backend).with_registry(registry));

    let point = Value::named("point", Value::List(vec![Value::Int(1), Value::Int(2)]));
    let value = script.execute(&[point.clone()]).unwrap();
    assert_eq!(value, Value::List(vec![point]));

    let err = script
        .execute(&[Value::named("secret", Value::Nil)])
        .unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Transport);
    assert!(err.message.contains("secret"), "{}", err.message);

    assert!(script.execute(&[Value::Int(5)]).is_ok());
}

#[test]
fn concurrent_calls_are_serialized() {
    let script = Arc::new(echo_script());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let script = Arc::clone(&script);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let args = vec![Value::Int(t), Value::Int(i)];
                    let value = script.execute(&args).unwrap();
                    assert_eq!(value, Value::List(args));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn close_from_another_thread() {
    let script = Arc::new(echo_script());
    let closer = {
        let script = Arc::clone(&script);
        std::thread::spawn(move || script.close())
    };
    closer.join().unwrap();
    let err = script.execute(&[]).unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Closed);
}

#[test]
fn close_unblocks_a_call_waiting_on_a_hung_child() {
    let script = Arc::new(Script::new(ECHO, &ScriptConfig::new(worker("hang"))));
    assert!(script.is_ready());

    let caller = {
        let script = Arc::clone(&script);
        std::thread::spawn(move || script.execute(&[Value::from("anyone there")]))
    };
    std::thread::sleep(std::time::Duration::from_millis(200));
    script.close();

    let err = caller.join().unwrap().unwrap_err();
    assert_eq!(err.kind, ScriptErrorKind::Closed);
}
