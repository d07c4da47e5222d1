//! `$VAR` / `${VAR}` expansion for string values of a TOML document.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use toml::{Table, Value};

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable reference regex is valid")
});

/// Expand variable references in every string value of `table`, recursing into
/// nested tables (including tables inside arrays).
///
/// Keys are never expanded and neither are bare strings inside arrays. References to
/// variables that `lookup` does not know are kept verbatim, as are shell-style
/// `${VAR:=default}` forms.
pub fn expand_vars(table: &mut Table, lookup: &impl Fn(&str) -> Option<String>) {
    for (_, value) in table.iter_mut() {
        match value {
            Value::String(text) => *text = expand_str(text, lookup),
            Value::Table(nested) => expand_vars(nested, lookup),
            Value::Array(items) => {
                for item in items {
                    if let Value::Table(nested) = item {
                        expand_vars(nested, lookup);
                    }
                }
            }
            _ => {}
        }
    }
}

fn expand_str(text: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    VAR_REF
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
