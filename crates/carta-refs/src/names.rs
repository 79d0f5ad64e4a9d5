//! Branch name validation following git-style conventions.
//!
//! Valid branch names:
//! - Must be non-empty
//! - Must not contain whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..` (double dot) or `@{`
//! - Must not start or end with `.` or `/`
//! - Must not end with `.lock`
//! - Must not contain consecutive slashes (`//`)

use crate::error::{RefError, RefResult};

/// Characters that are forbidden anywhere in a branch name.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

/// Validate a branch name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use carta_refs::names::validate_branch_name;
///
/// assert!(validate_branch_name("master").is_ok());
/// assert!(validate_branch_name("feature/docs").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("bad..name").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> RefResult<()> {
    let invalid = |reason: String| {
        Err(RefError::InvalidBranchName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("branch name must not be empty".into());
    }
    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return invalid(format!("contains forbidden character: {ch:?}"));
        }
    }
    if name.contains("..") {
        return invalid("must not contain '..'".into());
    }
    if name.contains("@{") {
        return invalid("must not contain '@{'".into());
    }
    if name.starts_with('.') || name.ends_with('.') {
        return invalid("must not start or end with '.'".into());
    }
    if name.starts_with('/') || name.ends_with('/') {
        return invalid("must not start or end with '/'".into());
    }
    if name.ends_with(".lock") {
        return invalid("must not end with '.lock'".into());
    }
    if name.contains("//") {
        return invalid("must not contain consecutive slashes".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_names() {
        for name in ["master", "main", "feature/docs", "release-1.2", "a"] {
            assert!(validate_branch_name(name).is_ok(), "rejected: {name}");
        }
    }

    #[test]
    fn rejects_invalid_names() {
        for name in [
            "",
            "has space",
            "bad..name",
            "ends.",
            ".starts",
            "/leading",
            "trailing/",
            "x.lock",
            "a//b",
            "re@{flog}",
            "wild*card",
        ] {
            assert!(validate_branch_name(name).is_err(), "accepted: {name}");
        }
    }
}
