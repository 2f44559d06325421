use std::ffi::OsString;
use std::io::BufRead as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use goscript_host::{
    extract_signature, CommandBackend, GoRunBackend, Script, ScriptConfig, ScriptError,
    TypeRegistry, Value,
};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const ENV_LOG: &str = "GOSCRIPT_LOG";

#[derive(Parser)]
#[command(name = "goscript")]
#[command(about = "Run a Go snippet as a persistent process and call its goscript function.", long_about = None)]
struct Cli {
    /// File holding the snippet.
    #[arg(long, value_name = "PATH", conflicts_with = "code", required_unless_present = "code")]
    script: Option<PathBuf>,

    /// The snippet itself.
    #[arg(long, value_name = "TEXT")]
    code: Option<String>,

    /// JSON array of arguments for one call. Repeat for more calls.
    #[arg(long = "call", value_name = "JSON")]
    calls: Vec<String>,

    /// Call once per stdin line, passing the line as the only argument.
    #[arg(long, conflicts_with = "calls")]
    lines: bool,

    /// Type name allowed in `{"$type": ...}` arguments and results.
    #[arg(long = "register-type", value_name = "NAME")]
    register_types: Vec<String>,

    /// Go binary used for `go run`.
    #[arg(long, value_name = "PATH", conflicts_with = "backend_cmd")]
    go: Option<OsString>,

    /// Run this program with the generated file path instead of `go run`.
    #[arg(long, value_name = "PROGRAM")]
    backend_cmd: Option<OsString>,

    /// Root for per-script work directories.
    #[arg(long, value_name = "DIR", env = "GOSCRIPT_TMPDIR")]
    tmpdir: Option<PathBuf>,

    /// Print the generated program and exit.
    #[arg(long)]
    print_harness: bool,
}

#[derive(Serialize)]
struct CallReport {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CallReport {
    fn from_result(result: Result<Value, ScriptError>) -> Self {
        match result {
            Ok(value) => Self {
                ok: true,
                value: Some(value.to_json()),
                error: None,
            },
            Err(err) => Self {
                ok: false,
                value: None,
                error: Some(err.message),
            },
        }
    }
}

fn main() -> std::process::ExitCode {
    init_logging();
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();

    let snippet = match (&cli.script, &cli.code) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("read script: {}", path.display()))?,
        (None, Some(code)) => code.clone(),
        (None, None) => anyhow::bail!("one of --script or --code is required"),
    };
    let config = build_config(&cli)?;

    if cli.print_harness {
        let signature = extract_signature(&snippet)?;
        let program = config
            .template
            .render(&snippet, &signature, &config.registry)?;
        print!("{program}");
        return Ok(std::process::ExitCode::SUCCESS);
    }

    let calls = parse_calls(&cli.calls)?;

    let script = Script::new(&snippet, &config);
    if let Some(err) = script.error() {
        return Err(err.clone()).context("start goscript");
    }

    let mut failed = false;
    let mut report = |result: Result<Value, ScriptError>| -> Result<()> {
        failed |= result.is_err();
        println!("{}", serde_json::to_string(&CallReport::from_result(result))?);
        Ok(())
    };

    if cli.lines {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("read stdin")?;
            report(script.execute(&[Value::String(line)]))?;
        }
    } else if calls.is_empty() {
        report(script.execute(&[]))?;
    } else {
        for args in &calls {
            report(script.execute(args))?;
        }
    }
    script.close();

    Ok(if failed {
        std::process::ExitCode::from(1)
    } else {
        std::process::ExitCode::SUCCESS
    })
}

fn build_config(cli: &Cli) -> Result<ScriptConfig> {
    let mut config = match (&cli.backend_cmd, &cli.go) {
        (Some(program), _) => ScriptConfig::new(CommandBackend::new(program.clone())),
        (None, Some(go)) => ScriptConfig::new(GoRunBackend {
            go: go.clone(),
            ..GoRunBackend::from_env()
        }),
        (None, None) => ScriptConfig::from_env(),
    };
    if let Some(dir) = &cli.tmpdir {
        config = config.with_temp_root(dir.clone());
    }

    let mut registry = TypeRegistry::new();
    for name in &cli.register_types {
        registry
            .register(name)
            .with_context(|| format!("--register-type {name}"))?;
    }
    Ok(config.with_registry(registry))
}

fn parse_calls(raw: &[String]) -> Result<Vec<Vec<Value>>> {
    raw.iter()
        .map(|text| -> Result<Vec<Value>> {
            let json: serde_json::Value =
                serde_json::from_str(text).with_context(|| format!("parse --call {text}"))?;
            let serde_json::Value::Array(items) = json else {
                anyhow::bail!("--call must be a JSON array, got {text}");
            };
            items
                .iter()
                .map(|item| Value::from_json(item).with_context(|| format!("--call {text}")))
                .collect()
        })
        .collect()
}
