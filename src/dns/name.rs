//! Domain name normalization and matching helpers
//!
//! Policy matching is case-insensitive and ignores the trailing root dot, so
//! `"Example.com."` and `"example.com"` denote the same zone. Names forwarded
//! upstream are never rewritten; these helpers only produce comparison keys.

use regex::{Regex, RegexBuilder};

/// Lower-case a name and strip any trailing dots
pub fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Compare two names after normalization
pub fn names_equal(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Returns true if `name` is a strict child of `parent`, split on a label
/// boundary. Both arguments are expected to be normalized already.
///
/// `a.example.com` is a subzone of `example.com`, while `notexample.com` and
/// `example.com` itself are not.
pub fn is_subzone(name: &str, parent: &str) -> bool {
    if parent.is_empty() || name.len() <= parent.len() + 1 {
        return false;
    }

    name.ends_with(parent) && name.as_bytes()[name.len() - parent.len() - 1] == b'.'
}

/// Returns true if `name` equals `zone` or lies below it
pub fn is_in_zone(name: &str, zone: &str) -> bool {
    name == zone || is_subzone(name, zone)
}

/// Compile a policy pattern so that it has to match the whole name.
///
/// Patterns are matched against normalized names, so the regex is compiled
/// case-insensitive and a trailing `\.` or `.` in the pattern is dropped.
pub fn compile_full_match(pattern: &str) -> Result<Regex, regex::Error> {
    let trimmed = pattern.strip_suffix("\\.").unwrap_or(pattern);
    let trimmed = if trimmed.ends_with('.') && !trimmed.ends_with("\\.") && !trimmed.ends_with(".*") {
        &trimmed[..trimmed.len() - 1]
    } else {
        trimmed
    };

    RegexBuilder::new(&format!("^(?:{})$", trimmed))
        .case_insensitive(true)
        .build()
}
