//! `${VAR}` placeholder resolution for header and environment values.
//!
//! Placeholders are resolved against the process environment when a source
//! is read. A variable that is not set resolves to the empty string and is
//! reported back to the caller so it can be logged.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Result of resolving one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolated {
    /// Input with every set placeholder substituted.
    pub value: String,
    /// Variables referenced but not set, in order of appearance.
    pub unresolved: Vec<String>,
}

/// Resolve placeholders against the process environment.
pub fn interpolate(input: &str) -> Interpolated {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Resolve placeholders using `lookup`.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Interpolated
where
    F: Fn(&str) -> Option<String>,
{
    let mut unresolved = Vec::new();
    let value = PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            lookup(name).unwrap_or_else(|| {
                if !unresolved.iter().any(|u| u == name) {
                    unresolved.push(name.to_string());
                }
                String::new()
            })
        })
        .into_owned();
    Interpolated { value, unresolved }
}
