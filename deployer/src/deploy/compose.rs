//! Compose file scanning

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

/// Start of `${NAME...` or bare `$NAME`.
///
/// Only the name is matched, never the modifier tail, so references nested
/// in a default such as `${A:-${B}}` are found too.
static VARIABLE_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)").ok());

/// Names of all variables referenced in `text`.
///
/// This is a plain textual scan: references inside comments, `$$` escapes
/// and unresolved syntax all count.
pub fn extract_referenced_variables(text: &str) -> BTreeSet<String> {
    let Some(re) = VARIABLE_REFERENCE.as_ref() else {
        return BTreeSet::new();
    };

    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Read `compose_file` and collect its variable references.
///
/// An unreadable file yields an empty set.
pub async fn referenced_variables_in(compose_file: &Path) -> BTreeSet<String> {
    match tokio::fs::read_to_string(compose_file).await {
        Ok(content) => {
            let vars = extract_referenced_variables(&content);
            debug!("{} references {} variables", compose_file.display(), vars.len());
            vars
        }
        Err(e) => {
            warn!("Failed to parse compose file {}: {}", compose_file.display(), e);
            BTreeSet::new()
        }
    }
}
