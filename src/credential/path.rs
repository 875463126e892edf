//! Path expansion for file credential sources

use std::path::PathBuf;

/// Expand `$VAR` / `${VAR}` references, then a leading `~`.
///
/// Unset variables expand to the empty string. A `$` not followed by a
/// variable name is kept as-is.
pub(crate) fn expand_path(raw: &str) -> PathBuf {
    let substituted = substitute_env(raw);
    expand_home(&substituted)
}

fn substitute_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if closed {
                result.push_str(&std::env::var(&name).unwrap_or_default());
            } else {
                // Unterminated, keep literal
                result.push_str("${");
                result.push_str(&name);
            }
            continue;
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            result.push('$');
        } else {
            result.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }

    result
}

fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
