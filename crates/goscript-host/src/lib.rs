//! Run Go snippets as persistent child processes and call into them.
//!
//! A snippet declares `func goscript(...)` on a single line. [`Script::new`]
//! wraps it in a generated `package main`, starts it through an
//! [`ExecutionBackend`] and waits for the ready handshake; each
//! [`Script::call`] then sends one request frame and reads one response.

pub mod backend;
pub mod config;
pub mod error;
pub mod harness;
pub mod remap;
pub mod script;
pub mod signature;
mod workdir;

pub use backend::{CommandBackend, ExecutionBackend, GoRunBackend};
pub use config::ScriptConfig;
pub use error::{ScriptError, ScriptErrorKind};
pub use harness::{HarnessTemplate, GENERATED_FILE_NAME};
pub use remap::{remap_diagnostics, RemapContext};
pub use script::Script;
pub use signature::{extract_signature, ArgDescriptor, Signature};

pub use goscript_wire::{Response, TypeRegistry, Value, WireError};
