//! Secret redaction applied before anything is stored or logged.
//!
//! Three layers: known-sensitive environment values, recognizable GitHub
//! token shapes, and `token=`-style parameters. Parameter matching is
//! prefix-safe — `my_token=` and `x_access_token=` are left alone.

use std::sync::LazyLock;

use regex::Regex;

pub const REDACTED: &str = "[redacted]";

/// Environment variables whose *values* must never appear in output.
const SENSITIVE_ENV: [&str; 4] = [
    "GH_TOKEN",
    "GITHUB_TOKEN",
    "PANEL_ACTOR_TOKEN",
    "PANEL_ROUTINES_SECRET",
];

static GITHUB_TOKEN_SHAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(ghp_[A-Za-z0-9]{16,}|github_pat_[A-Za-z0-9_]{16,})").expect("valid regex")
});

// The leading capture stands in for a lookbehind (the regex crate has none):
// a match must start the string or follow ? & or whitespace, so identifiers
// like `my_token=` never match.
static TOKEN_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<pre>^|[?&\s])(?P<key>access_token|token|key)=(?P<val>[^\s&"']+)"#)
        .expect("valid regex")
});

/// Replace anything secret-shaped in `text` with `[redacted]`.
pub fn redact_secrets(text: &str) -> String {
    let mut out = text.to_string();

    for name in SENSITIVE_ENV {
        if let Ok(value) = std::env::var(name) {
            if value.len() >= 6 {
                out = out.replace(&value, REDACTED);
            }
        }
    }

    out = GITHUB_TOKEN_SHAPES.replace_all(&out, REDACTED).into_owned();
    TOKEN_PARAM
        .replace_all(&out, format!("$pre$key={REDACTED}"))
        .into_owned()
}
