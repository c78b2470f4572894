//! Output scrubbing for step tails
//!
//! `compose config` prints the fully interpolated configuration, so every
//! tail is scrubbed before it reaches a response or a log line.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement for hidden values
pub const MASK: &str = "***";

/// `<key mentioning a credential> [:=] <value>` on a single line
static SENSITIVE_ASSIGNMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?im)^([ \t]*)([^\s:=]*(?:secret|token|password|passwd|pwd|key)[^:=\n\r]*?)[ \t]*[:=][ \t]*[^\n\r]+")
        .ok()
});

/// Mask credential-looking assignments and every literal occurrence of `secrets`
pub fn sanitize_output(text: &str, secrets: &[String]) -> String {
    let mut cleaned = match SENSITIVE_ASSIGNMENT.as_ref() {
        Some(re) => re
            .replace_all(text, |caps: &regex::Captures| format!("{}{}: {}", &caps[1], &caps[2], MASK))
            .into_owned(),
        None => text.to_string(),
    };

    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        if cleaned.contains(secret.as_str()) {
            cleaned = cleaned.replace(secret.as_str(), MASK);
        }
    }

    cleaned
}
