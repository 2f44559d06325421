use std::fmt;

use goscript_wire::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptErrorKind {
    /// The snippet has no usable `func goscript(` declaration.
    Signature,
    /// The harness program could not be rendered or written.
    Generate,
    /// The backend process could not be started.
    Spawn,
    /// The child died or misbehaved before the ready handshake.
    Startup,
    /// A request or response frame could not be moved.
    Transport,
    /// The child exited during a call; the message is its stderr.
    Process,
    /// The entry point itself returned an error.
    Call,
    /// The script was closed.
    Closed,
}

impl ScriptErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptErrorKind::Signature => "signature",
            ScriptErrorKind::Generate => "generate",
            ScriptErrorKind::Spawn => "spawn",
            ScriptErrorKind::Startup => "startup",
            ScriptErrorKind::Transport => "transport",
            ScriptErrorKind::Process => "process",
            ScriptErrorKind::Call => "call",
            ScriptErrorKind::Closed => "closed",
        }
    }
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure a [`crate::Script`] reports.
///
/// Displays as the bare message: a startup failure shows the remapped
/// compiler output and a call failure shows the entry point's own error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
    pub exit_code: Option<i32>,
}

impl ScriptError {
    pub fn new(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub(crate) fn from_anyhow(kind: ScriptErrorKind, err: anyhow::Error) -> Self {
        Self::new(kind, format!("{err:#}"))
    }

    pub(crate) fn transport(err: &WireError) -> Self {
        Self::new(ScriptErrorKind::Transport, err.to_string())
    }

    pub(crate) fn closed() -> Self {
        Self::new(ScriptErrorKind::Closed, "goscript is closed")
    }

    pub fn is_call_error(&self) -> bool {
        self.kind == ScriptErrorKind::Call
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}
