use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    /// Matches a named slot like `{{name}}`. Names cannot span lines.
    static ref PLACEHOLDER_MATCH_RE: Regex = Regex::new(r"\{\{[^\r\n{}]+?\}\}").unwrap();
}

/// `{{name}}` → `name`. Only valid on a regex match.
#[inline]
fn strip_format(key: &str) -> &str {
    &key[2..key.len() - 2]
}

/// One pass over `original`: slots with a value are replaced, the rest are kept as written.
pub(crate) fn replace_placeholders(original: &str, values: &BTreeMap<String, Option<String>>) -> String {
    PLACEHOLDER_MATCH_RE
        .replace_all(original, |captures: &Captures| {
            let slot = &captures[0];
            match values.get(strip_format(slot)) {
                Some(Some(value)) => value.clone(),
                _ => slot.to_string(),
            }
        })
        .into_owned()
}

pub(crate) fn get_placeholders(text: &str) -> BTreeSet<String> {
    PLACEHOLDER_MATCH_RE.find_iter(text)
        .map(|m| strip_format(m.as_str()).to_string())
        .collect()
}
