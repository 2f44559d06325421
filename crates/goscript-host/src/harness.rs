//! Harness program generation.
//!
//! The harness is a complete `package main` program: fixed imports, the
//! snippet verbatim between two marker comments, the Go half of the envelope
//! codec, and a dispatcher that binds request elements to the entry point's
//! parameters. The template is data; rendering it is a single pass over
//! `{{NAME}}` placeholders, so text coming from the snippet is never
//! rescanned.

use goscript_wire::{TypeRegistry, MAX_DEPTH, MAX_FRAME_LEN, READY_TOKEN};

use crate::error::{ScriptError, ScriptErrorKind};
use crate::remap::RemapContext;
use crate::signature::{ArgDescriptor, Signature};

/// File name the harness is written under inside its work directory.
pub const GENERATED_FILE_NAME: &str = "goscript.go";

const STANDARD_TEMPLATE: &str = include_str!("templates/harness.go.tmpl");

const SNIPPET_PLACEHOLDER: &str = "{{SNIPPET}}";

/// Prefix of every identifier the harness introduces next to the snippet.
const RESERVED_PREFIX: &str = "goscript";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessTemplate {
    text: String,
    snippet_offset: usize,
}

impl HarnessTemplate {
    /// The bundled template.
    pub fn standard() -> Self {
        Self {
            text: STANDARD_TEMPLATE.to_string(),
            snippet_offset: snippet_offset(STANDARD_TEMPLATE).unwrap_or(0),
        }
    }

    /// A custom template. `{{SNIPPET}}` must sit alone on its own line.
    pub fn new(text: impl Into<String>) -> Result<Self, ScriptError> {
        let text = text.into();
        let snippet_offset = snippet_offset(&text).ok_or_else(|| {
            ScriptError::new(
                ScriptErrorKind::Generate,
                format!("harness template must contain {SNIPPET_PLACEHOLDER} on a line of its own"),
            )
        })?;
        Ok(Self {
            text,
            snippet_offset,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of generated lines before the snippet's first line.
    pub fn snippet_offset(&self) -> usize {
        self.snippet_offset
    }

    pub fn remap_context(&self, snippet: &str) -> RemapContext {
        RemapContext {
            file_name: GENERATED_FILE_NAME.to_string(),
            offset: self.snippet_offset,
            snippet_lines: snippet.lines().count(),
        }
    }

    pub fn render(
        &self,
        snippet: &str,
        signature: &Signature,
        registry: &TypeRegistry,
    ) -> Result<String, ScriptError> {
        let types = type_table(registry);
        let bindings = bindings(&signature.args);
        let call_args = signature
            .args
            .iter()
            .map(|arg| {
                let local = local_name(arg);
                if arg.variadic {
                    format!("{local}...")
                } else {
                    local
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let ready = format!("{READY_TOKEN:?}");
        let max_frame = MAX_FRAME_LEN.to_string();
        let max_depth = MAX_DEPTH.to_string();

        fill(&self.text, |key| match key {
            "SNIPPET" => Some(snippet),
            "TYPES" => Some(types.as_str()),
            "BINDINGS" => Some(bindings.as_str()),
            "CALL_ARGS" => Some(call_args.as_str()),
            "READY" => Some(ready.as_str()),
            "MAX_FRAME" => Some(max_frame.as_str()),
            "MAX_DEPTH" => Some(max_depth.as_str()),
            _ => None,
        })
    }
}

impl Default for HarnessTemplate {
    fn default() -> Self {
        Self::standard()
    }
}

fn snippet_offset(text: &str) -> Option<usize> {
    text.lines()
        .position(|line| line.trim_end_matches('\r') == SNIPPET_PLACEHOLDER)
}

fn fill<'a>(
    text: &str,
    lookup: impl Fn(&str) -> Option<&'a str>,
) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(text.len() + 4096);
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(ScriptError::new(
                ScriptErrorKind::Generate,
                "unterminated placeholder in harness template",
            ));
        };
        let key = &after[..end];
        let value = lookup(key).ok_or_else(|| {
            ScriptError::new(
                ScriptErrorKind::Generate,
                format!("unknown placeholder {{{{{key}}}}} in harness template"),
            )
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn type_table(registry: &TypeRegistry) -> String {
    let mut out = String::new();
    for name in registry.names() {
        out.push_str(&format!("\t{name:?}: true,\n"));
    }
    out
}

/// Go local the request element is bound to before the call.
fn local_name(arg: &ArgDescriptor) -> String {
    if arg.name == "_" || arg.name.starts_with(RESERVED_PREFIX) {
        format!("{RESERVED_PREFIX}Arg{}", arg.index)
    } else {
        arg.name.clone()
    }
}

/// A declared type the harness rebuilds element by element.
enum Composite<'a> {
    List(&'a str),
    Map(&'a str),
}

fn composite(typ: &str) -> Option<Composite<'_>> {
    if let Some(elem) = typ.strip_prefix("[]") {
        return match elem {
            "interface{}" | "any" | "byte" | "uint8" => None,
            _ => Some(Composite::List(elem)),
        };
    }
    if let Some(elem) = typ.strip_prefix("map[string]") {
        return match elem {
            "interface{}" | "any" => None,
            _ => Some(Composite::Map(elem)),
        };
    }
    None
}

/// Go expression turning the decoded `expr` into a non-composite `typ`.
///
/// Integers arrive as `int` or `uint` and floats as `float64`; the helpers
/// range-check them into the declared width. Anything else is a type
/// assertion, so a mismatch panics into the call's error.
fn convert(expr: &str, typ: &str) -> String {
    match typ {
        "" | "interface{}" | "any" => expr.to_string(),
        "[]interface{}" | "[]any" => format!("goscriptAsList({expr})"),
        "map[string]interface{}" | "map[string]any" => format!("goscriptAsMap({expr})"),
        "int" => format!("int(goscriptAsInt({expr}, goscriptIntBits))"),
        "int8" | "int16" | "int32" => format!("{typ}(goscriptAsInt({expr}, {}))", &typ[3..]),
        "rune" => format!("rune(goscriptAsInt({expr}, 32))"),
        "int64" => format!("goscriptAsInt({expr}, 64)"),
        "uint" | "uintptr" => format!("{typ}(goscriptAsUint({expr}, goscriptIntBits))"),
        "uint8" | "uint16" | "uint32" => format!("{typ}(goscriptAsUint({expr}, {}))", &typ[4..]),
        "byte" => format!("byte(goscriptAsUint({expr}, 8))"),
        "uint64" => format!("goscriptAsUint({expr}, 64)"),
        "float32" => format!("float32(goscriptAsFloat({expr}))"),
        "float64" => format!("goscriptAsFloat({expr})"),
        _ => format!("{expr}.({typ})"),
    }
}

/// Accumulates the dispatcher's binding statements.
#[derive(Default)]
struct Binder {
    out: String,
    seq: usize,
}

impl Binder {
    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push('\t');
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("{RESERVED_PREFIX}{prefix}{}", self.seq);
        self.seq += 1;
        name
    }

    /// Declares `local` as `expr` converted to `typ`.
    fn bind(&mut self, depth: usize, local: &str, expr: &str, typ: &str) {
        match composite(typ) {
            Some(Composite::List(elem)) => {
                let src = self.fresh("List");
                let item = self.fresh("Item");
                self.line(depth, &format!("{src} := goscriptAsList({expr})"));
                self.line(depth, &format!("{local} := make({typ}, 0, len({src}))"));
                self.line(depth, &format!("for _, {item} := range {src} {{"));
                self.store(depth + 1, &item, elem, |v| {
                    format!("{local} = append({local}, {v})")
                });
                self.line(depth, "}");
            }
            Some(Composite::Map(elem)) => {
                let src = self.fresh("Map");
                let key = self.fresh("Key");
                let item = self.fresh("Item");
                self.line(depth, &format!("{src} := goscriptAsMap({expr})"));
                self.line(depth, &format!("{local} := make({typ}, len({src}))"));
                self.line(depth, &format!("for {key}, {item} := range {src} {{"));
                self.store(depth + 1, &item, elem, |v| format!("{local}[{key}] = {v}"));
                self.line(depth, "}");
            }
            None => self.line(depth, &format!("{local} := {}", convert(expr, typ))),
        }
    }

    /// Converts `expr` to `typ` and hands the result to `stmt`.
    fn store(&mut self, depth: usize, expr: &str, typ: &str, stmt: impl Fn(&str) -> String) {
        if composite(typ).is_some() {
            let tmp = self.fresh("Elem");
            self.bind(depth, &tmp, expr, typ);
            self.line(depth, &stmt(&tmp));
        } else {
            self.line(depth, &stmt(&convert(expr, typ)));
        }
    }
}

fn bindings(args: &[ArgDescriptor]) -> String {
    let variadic = args.last().is_some_and(|arg| arg.variadic);
    let fixed = if variadic { args.len() - 1 } else { args.len() };

    let mut b = Binder::default();
    if variadic {
        b.line(1, &format!("if len(goscriptArgs) < {fixed} {{"));
        b.line(2, &format!("return nil, gsfmt.Errorf(\"goscript: expected at least {fixed} arguments, got %d\", len(goscriptArgs))"));
    } else {
        b.line(1, &format!("if len(goscriptArgs) != {fixed} {{"));
        b.line(2, &format!("return nil, gsfmt.Errorf(\"goscript: expected {fixed} arguments, got %d\", len(goscriptArgs))"));
    }
    b.line(1, "}");

    for arg in args {
        let local = local_name(arg);
        let i = arg.index;
        if arg.variadic {
            let elem = arg.element_type();
            b.line(1, &format!("{local} := make([]{elem}, 0, len(goscriptArgs)-{i})"));
            b.line(1, &format!("for _, goscriptItem := range goscriptArgs[{i}:] {{"));
            b.store(2, "goscriptItem", elem, |v| format!("{local} = append({local}, {v})"));
            b.line(1, "}");
        } else {
            b.bind(1, &local, &format!("goscriptArgs[{i}]"), &arg.declared_type);
        }
    }
    b.out
}
