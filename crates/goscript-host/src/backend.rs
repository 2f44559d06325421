//! How a generated program is turned into a running child.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::Command;

pub const ENV_GO: &str = "GOSCRIPT_GO";
pub const ENV_GO_FLAGS: &str = "GOSCRIPT_GO_FLAGS";

/// Builds the command that runs a generated harness.
///
/// The returned command only needs program and arguments; the caller wires
/// up stdio, the working directory and the process group.
pub trait ExecutionBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn command(&self, source: &Path) -> Command;
}

/// Compile-and-run through `go run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoRunBackend {
    pub go: OsString,
    pub flags: Vec<String>,
}

impl GoRunBackend {
    pub fn new(go: impl Into<OsString>) -> Self {
        Self {
            go: go.into(),
            flags: Vec::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// `GOSCRIPT_GO` names the go binary, `GOSCRIPT_GO_FLAGS` adds
    /// whitespace-separated build flags.
    pub fn from_env() -> Self {
        let go = std::env::var_os(ENV_GO)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| OsString::from("go"));
        let flags = std::env::var(ENV_GO_FLAGS).unwrap_or_default();
        Self::new(go).with_flags(flags.split_whitespace())
    }
}

impl Default for GoRunBackend {
    fn default() -> Self {
        Self::new("go")
    }
}

impl ExecutionBackend for GoRunBackend {
    fn name(&self) -> &str {
        "go-run"
    }

    fn command(&self, source: &Path) -> Command {
        let mut cmd = Command::new(&self.go);
        cmd.arg("run");
        cmd.args(&self.flags);
        // `go run` reports positions relative to its working directory, which
        // is the source's own directory.
        match source.file_name() {
            Some(file) => cmd.arg(file),
            None => cmd.arg(source),
        };
        cmd
    }
}

/// Runs an arbitrary program with the generated file path appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBackend {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl CommandBackend {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl ExecutionBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn command(&self, source: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg(source);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn go_run_passes_flags_before_the_file() {
        let backend = GoRunBackend::new("/opt/go/bin/go").with_flags(["-race", "-trimpath"]);
        let cmd = backend.command(Path::new("/tmp/goscript_1_0/goscript.go"));
        assert_eq!(cmd.get_program(), "/opt/go/bin/go");
        assert_eq!(args_of(&cmd), vec!["run", "-race", "-trimpath", "goscript.go"]);
    }

    #[test]
    fn command_backend_appends_source_path() {
        let backend = CommandBackend::new("worker")
            .arg("--quiet")
            .env("MODE", "echo");
        let cmd = backend.command(Path::new("/tmp/x/goscript.go"));
        assert_eq!(args_of(&cmd), vec!["--quiet", "/tmp/x/goscript.go"]);
        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].0, "MODE");
    }
}
