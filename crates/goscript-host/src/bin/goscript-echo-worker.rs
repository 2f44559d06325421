//! Speaks the child side of the goscript protocol without a Go toolchain.
//!
//! Invoked with the generated source path as its last argument, like any
//! `CommandBackend` program. `GOSCRIPT_ECHO_MODE` selects the behavior:
//!
//! - unset or `echo`: handshake, then answer every request with its own
//!   arguments as a list. A first argument of `"fail"` returns a call error;
//!   `"exit"` writes to stderr and exits with status 3; `"log"` writes a line
//!   to stderr and echoes; `"flood"` writes more stderr than the host keeps,
//!   then a panic line, and exits with status 3.
//! - `compile-error`: print a compiler-style failure pointing at the first
//!   snippet line and at a scaffolding line, then exit 2.
//! - `harness-error`: like `compile-error` but only the scaffolding line.
//! - `exit-clean`: exit 0 without a handshake.
//! - `bad-ready`: handshake with the wrong token.
//! - `hang`: handshake, then never answer.
//!
//! `GOSCRIPT_ECHO_TYPES` is a comma-separated list of registered type names.

use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use goscript_wire::{
    codec::{encode_value, write_frame},
    read_request, write_ready, write_response, Response, TypeRegistry, Value, WireError,
};

const MARKER: &str = "// <goscript>";

fn registry() -> Result<TypeRegistry, String> {
    let mut registry = TypeRegistry::new();
    let raw = std::env::var("GOSCRIPT_ECHO_TYPES").unwrap_or_default();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        registry.register(name).map_err(|err| err.to_string())?;
    }
    Ok(registry)
}

fn echo(registry: &TypeRegistry) -> Result<(), WireError> {
    let mut stdin = BufReader::new(io::stdin().lock());
    let mut stdout = BufWriter::new(io::stdout().lock());
    write_ready(&mut stdout)?;

    loop {
        let args = match read_request(&mut stdin, registry) {
            Ok(args) => args,
            Err(WireError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        };
        let response = match args.first().and_then(Value::as_str) {
            Some("fail") => Response::err("requested failure"),
            Some("exit") => {
                eprintln!("goscript-echo-worker: exiting on request");
                std::process::exit(3);
            }
            Some("log") => {
                eprintln!("goscript-echo-worker: chatter");
                Response::ok(Value::List(args))
            }
            Some("flood") => {
                let mut stderr = io::stderr().lock();
                let noise = vec![b'x'; 64 * 1024];
                for _ in 0..5 {
                    stderr.write_all(&noise)?;
                }
                writeln!(stderr, "\npanic: flood finished")?;
                stderr.flush()?;
                std::process::exit(3);
            }
            _ => Response::ok(Value::List(args)),
        };
        write_response(&mut stdout, &response, registry)?;
    }
}

fn hang() -> Result<(), WireError> {
    let mut stdin = BufReader::new(io::stdin().lock());
    let mut stdout = io::stdout().lock();
    write_ready(&mut stdout)?;
    read_request(&mut stdin, &TypeRegistry::default())?;
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}

fn compile_error(source: &Path, with_snippet_line: bool) -> io::Result<()> {
    let text = std::fs::read_to_string(source)?;
    let marker = text
        .lines()
        .position(|line| line == MARKER)
        .unwrap_or(0);
    // 1-based line of the marker is `marker + 1`; the snippet starts right after it.
    let first_snippet_line = marker + 2;
    let past_the_end = text.lines().count() + 10;

    let mut stderr = io::stderr().lock();
    writeln!(stderr, "# command-line-arguments")?;
    if with_snippet_line {
        writeln!(stderr, "./goscript.go:{first_snippet_line}:10: undefined: x")?;
    }
    writeln!(stderr, "./goscript.go:{past_the_end}:2: harness scaffolding")?;
    stderr.flush()
}

fn bad_ready() -> Result<(), WireError> {
    let mut payload = Vec::new();
    encode_value(&mut payload, &Value::from("steady"), &TypeRegistry::default())?;
    let mut stdout = io::stdout().lock();
    write_frame(&mut stdout, &payload)
}

fn main() {
    let source = std::env::args_os().last().unwrap_or_default();
    let mode = std::env::var("GOSCRIPT_ECHO_MODE").unwrap_or_default();

    let result = match mode.as_str() {
        "" | "echo" => registry().and_then(|reg| echo(&reg).map_err(|err| err.to_string())),
        "compile-error" | "harness-error" => {
            if let Err(err) = compile_error(Path::new(&source), mode == "compile-error") {
                eprintln!("goscript-echo-worker: {err}");
            }
            std::process::exit(2);
        }
        "exit-clean" => Ok(()),
        "bad-ready" => bad_ready().map_err(|err| err.to_string()),
        "hang" => hang().map_err(|err| err.to_string()),
        other => Err(format!("unknown mode {other:?}")),
    };

    if let Err(err) = result {
        eprintln!("goscript-echo-worker: {err}");
        std::process::exit(1);
    }
}
