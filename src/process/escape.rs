// src/process/escape.rs

//! Platform-aware argument quoting.

use std::sync::LazyLock;

use regex::Regex;

use crate::platform::PlatformCapabilities;

/// A `cmd` fragment wrapped in percent signs, which `cmd` would expand as an
/// environment variable.
static PERCENT_WRAPPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%[^%]+%$").expect("static regex is valid")
});

/// Quote `arg` so the platform shell passes it through verbatim.
pub fn escape_argument(arg: &str, caps: &PlatformCapabilities) -> String {
    if caps.is_windows() {
        escape_windows(arg)
    } else {
        escape_posix(arg)
    }
}

/// Single-quote for `sh`; embedded quotes become `'\''`.
pub fn escape_posix(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Double-quote for `cmd`.
///
/// Embedded double quotes are backslash-escaped, `%VAR%` fragments are kept
/// out of the quoted region with `^%` so they are not expanded, and a trailing
/// backslash is doubled so it does not escape the closing quote.
pub fn escape_windows(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }

    let mut escaped = String::with_capacity(arg.len() + 2);
    let mut quote = false;

    for part in split_keep_quotes(arg) {
        if part == "\"" {
            escaped.push_str("\\\"");
        } else if PERCENT_WRAPPED.is_match(part) {
            escaped.push_str("^%\"");
            escaped.push_str(&part[1..part.len() - 1]);
            escaped.push_str("\"^%");
        } else {
            quote = true;
            escaped.push_str(part);
            if part.ends_with('\\') {
                escaped.push('\\');
            }
        }
    }

    if quote {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

/// Split on `"`, keeping each quote as its own part and dropping empties.
fn split_keep_quotes(arg: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, ch) in arg.char_indices() {
        if ch == '"' {
            if start < idx {
                parts.push(&arg[start..idx]);
            }
            parts.push(&arg[idx..idx + 1]);
            start = idx + 1;
        }
    }
    if start < arg.len() {
        parts.push(&arg[start..]);
    }
    parts
}
