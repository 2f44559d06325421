//! Maps diagnostics about the generated program back onto the snippet.

/// Shown in place of the generated file's path.
pub const SNIPPET_PLACEHOLDER_NAME: &str = "goscript";

/// Header `go build` prints before per-package errors.
const PACKAGE_HEADER: &str = "# command-line-arguments";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapContext {
    pub file_name: String,
    /// Generated lines before the snippet's first line.
    pub offset: usize,
    pub snippet_lines: usize,
}

/// Rewrites `raw` so positions refer to snippet lines.
///
/// Lines pointing into the harness scaffolding are dropped, as is the package
/// header. Lines that never mention the generated file are kept untouched.
pub fn remap_diagnostics(raw: &str, ctx: &RemapContext) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        if line.trim() == PACKAGE_HEADER {
            continue;
        }
        if let Some(line) = remap_line(line, ctx) {
            out.push(line);
        }
    }
    out.join("\n")
}

fn remap_line(line: &str, ctx: &RemapContext) -> Option<String> {
    let needle = format!("{}:", ctx.file_name);
    let Some(at) = line.find(&needle) else {
        return Some(line.to_string());
    };
    let path_start = line[..at]
        .rfind(char::is_whitespace)
        .map(|i| i + line[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    let after = &line[at + needle.len()..];
    let digits = after
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after.len());

    let mut remapped = String::with_capacity(line.len());
    remapped.push_str(&line[..path_start]);
    remapped.push_str(SNIPPET_PLACEHOLDER_NAME);
    remapped.push(':');

    if digits == 0 {
        remapped.push_str(after);
        return Some(remapped);
    }
    let n: usize = after[..digits].parse().ok()?;
    if n <= ctx.offset {
        return None;
    }
    let adjusted = n - ctx.offset;
    if adjusted > ctx.snippet_lines {
        return None;
    }
    remapped.push_str(&adjusted.to_string());
    remapped.push_str(&after[digits..]);
    Some(remapped)
}
