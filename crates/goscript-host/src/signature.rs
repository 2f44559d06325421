//! Entry-point signature extraction.
//!
//! Only the declaration line is parsed, and only far enough to know each
//! parameter's name and declared type. The Go compiler remains the judge of
//! whether the declaration is valid.

use crate::error::{ScriptError, ScriptErrorKind};

/// Every snippet must declare its entry point on a line starting with this.
pub const ENTRY_POINT_PREFIX: &str = "func goscript(";

pub const VARIADIC_MARKER: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDescriptor {
    pub index: usize,
    pub name: String,
    /// The type as written, including a leading `...` for a variadic parameter.
    /// Empty when the declaration left the parameter untyped.
    pub declared_type: String,
    pub variadic: bool,
}

impl ArgDescriptor {
    /// Type of a single element: the declared type without the variadic marker.
    pub fn element_type(&self) -> &str {
        if self.variadic {
            &self.declared_type[VARIADIC_MARKER.len()..]
        } else {
            &self.declared_type
        }
    }

    /// The type the entry point sees: a slice for a variadic parameter.
    pub fn type_name(&self) -> String {
        if self.variadic {
            format!("[]{}", self.element_type())
        } else {
            self.declared_type.clone()
        }
    }

    /// How the parameter is passed at the call site.
    pub fn call_arg(&self) -> String {
        if self.variadic {
            format!("{}{VARIADIC_MARKER}", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// 1-based snippet line holding the declaration.
    pub line: usize,
    pub args: Vec<ArgDescriptor>,
}

pub fn extract_signature(snippet: &str) -> Result<Signature, ScriptError> {
    for (i, line) in snippet.lines().enumerate() {
        let trimmed = line.trim();
        if !trimmed.starts_with(ENTRY_POINT_PREFIX) {
            continue;
        }
        let line_no = i + 1;
        let args = parse_parameters(trimmed).ok_or_else(|| {
            ScriptError::new(
                ScriptErrorKind::Signature,
                format!("goscript:{line_no}: parameter list of func goscript must close on the same line"),
            )
        })?;
        return Ok(Signature {
            line: line_no,
            args,
        });
    }
    Err(ScriptError::new(
        ScriptErrorKind::Signature,
        "missing func goscript",
    ))
}

/// Parses the parameter list of a declaration line.
///
/// Returns `None` when the list opened by the first `(` never closes.
pub fn parse_parameters(decl: &str) -> Option<Vec<ArgDescriptor>> {
    let open = decl.find('(')?;
    let inner = enclosed(&decl[open + 1..])?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    let mut segments = split_top_level(inner);
    // Go allows a trailing comma after the last parameter.
    if segments.len() > 1 && segments.last().is_some_and(|s| s.trim().is_empty()) {
        segments.pop();
    }
    let mut args: Vec<ArgDescriptor> = Vec::with_capacity(segments.len());
    for (index, segment) in segments.into_iter().enumerate() {
        let segment = segment.trim();
        let (name, typ) = match segment.find(char::is_whitespace) {
            Some(at) => (&segment[..at], segment[at..].trim()),
            None => (segment, ""),
        };
        if !typ.is_empty() {
            // `a, b string`: the type applies to the untyped run before it.
            for prev in args.iter_mut().rev() {
                if !prev.declared_type.is_empty() {
                    break;
                }
                prev.declared_type = typ.to_string();
            }
        }
        args.push(ArgDescriptor {
            index,
            name: name.to_string(),
            declared_type: typ.to_string(),
            variadic: false,
        });
    }
    if let Some(last) = args.last_mut() {
        last.variadic = last.declared_type.starts_with(VARIADIC_MARKER);
    }
    Some(args)
}

/// Text up to the `)` matching an already consumed `(`.
fn enclosed(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => return Some(&s[..i]),
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}
