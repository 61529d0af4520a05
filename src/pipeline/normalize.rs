//! Content normalisation: classifier output of any JSON shape → one flat string.
//!
//! Vision models return the slide body as a string, a `{"text": ...}` or
//! `{"content": ...}` wrapper, a list of blocks, or occasionally a number.
//! [`RawContent`] names those shapes at the boundary; [`normalize`] collapses
//! each of them into a single trimmed line.
//!
//! ## Rules
//!
//! 1. Strings: strip quote/brace punctuation from both ends, drop
//!    stringified key markers (`'text':`, `"type":`, `'resource'`), and
//!    collapse whitespace runs to one space. Repeated until stable.
//! 2. Mappings: unwrap `text`, then `content`; otherwise join the normalised
//!    values.
//! 3. Sequences: normalise each item, drop empties, join with one space.
//! 4. `null` → empty; other scalars → their JSON text, then rule 1.
//!
//! The result is a fixpoint: `normalize_str(&normalize(x)) == normalize(x)`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shape of a classifier's content field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Sequence(Vec<RawContent>),
    Mapping(Map<String, Value>),
    Other(Value),
}

impl Default for RawContent {
    fn default() -> Self {
        RawContent::Other(Value::Null)
    }
}

impl From<Value> for RawContent {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => RawContent::Text(s),
            Value::Array(items) => RawContent::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(m) => RawContent::Mapping(m),
            other => RawContent::Other(other),
        }
    }
}

impl From<&str> for RawContent {
    fn from(s: &str) -> Self {
        RawContent::Text(s.to_string())
    }
}

/// Keys unwrapped from a mapping, in priority order.
const WRAPPER_KEYS: [&str; 2] = ["text", "content"];

/// Flatten any content shape into a single normalised string.
pub fn normalize(raw: &RawContent) -> String {
    match raw {
        RawContent::Text(s) => normalize_str(s),
        RawContent::Sequence(items) => join_normalized(items.iter().map(normalize)),
        RawContent::Mapping(m) => {
            for key in WRAPPER_KEYS {
                if let Some(inner) = m.get(key) {
                    return normalize(&RawContent::from(inner.clone()));
                }
            }
            join_normalized(m.values().map(|v| normalize(&RawContent::from(v.clone()))))
        }
        RawContent::Other(Value::Null) => String::new(),
        RawContent::Other(v) => normalize_str(&v.to_string()),
    }
}

/// Normalise one string; see rule 1 in the module docs.
pub fn normalize_str(input: &str) -> String {
    let mut current = clean_once(input);
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn join_normalized(parts: impl Iterator<Item = String>) -> String {
    let joined = parts.filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ");
    normalize_str(&joined)
}

// ── Cleanup rules ────────────────────────────────────────────────────────────

const EDGE_PUNCTUATION: &[char] = &['{', '}', '[', ']', '"', '\''];

static RE_KEY_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']?\b(?:text|type|content)["']\s*:\s*|["']?\bresource["']"#).unwrap()
});

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn clean_once(input: &str) -> String {
    let s = input.trim().trim_matches(EDGE_PUNCTUATION);
    let s = RE_KEY_MARKERS.replace_all(s, " ");
    let s = RE_WHITESPACE.replace_all(&s, " ");
    s.trim().trim_matches(EDGE_PUNCTUATION).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn n(v: Value) -> String {
        normalize(&RawContent::from(v))
    }

    #[test]
    fn plain_string_collapses_whitespace() {
        assert_eq!(n(json!("  Hello \n\n  world\t!  ")), "Hello world !");
    }

    #[test]
    fn stringified_dict_artifacts_are_stripped() {
        assert_eq!(
            n(json!("{'type': 'paragraph', 'text': 'Photosynthesis basics'}")),
            "paragraph', Photosynthesis basics"
        );
        assert_eq!(n(json!("[\"Intro to cells\"]")), "Intro to cells");
        assert_eq!(n(json!("'resource' See appendix")), "See appendix");
    }

    #[test]
    fn text_wrapper_is_unwrapped_recursively() {
        assert_eq!(n(json!({"text": {"content": {"text": "  Deep  value "}}})), "Deep value");
    }

    #[test]
    fn text_takes_priority_over_content() {
        assert_eq!(n(json!({"content": "second", "text": "first"})), "first");
    }

    #[test]
    fn mapping_without_wrapper_joins_values() {
        assert_eq!(n(json!({"a": "alpha", "b": ["beta", "gamma"]})), "alpha beta gamma");
    }

    #[test]
    fn list_items_join_with_single_space_and_skip_empties() {
        assert_eq!(
            n(json!(["Mitochondria", "", {"text": "powerhouse"}, "   ", ["of", "the cell"]])),
            "Mitochondria powerhouse of the cell"
        );
    }

    #[test]
    fn scalars_and_null() {
        assert_eq!(n(json!(null)), "");
        assert_eq!(n(json!(42)), "42");
        assert_eq!(n(json!(true)), "true");
        assert_eq!(n(json!([])), "");
        assert_eq!(n(json!({})), "");
    }

    #[test]
    fn normalisation_is_idempotent() {
        let inputs = vec![
            json!("  {\"text\": \"'text': Nested\"}  "),
            json!("''\"{[x]}\"''"),
            json!({"text": ["a", {"content": " b  c "}]}),
            json!(["{'type': 'list'}", "'resource'", "  "]),
            json!("'te'text': xt': body"),
            json!(3.5),
        ];
        for v in inputs {
            let once = n(v.clone());
            assert_eq!(normalize_str(&once), once, "not idempotent for {v}");
            assert_eq!(normalize(&RawContent::Text(once.clone())), once);
        }
    }

    #[test]
    fn untagged_deserialisation_picks_the_right_shape() {
        let raw: RawContent = serde_json::from_value(json!("x")).unwrap();
        assert_eq!(raw, RawContent::Text("x".into()));
        let raw: RawContent = serde_json::from_value(json!({"text": "x"})).unwrap();
        assert!(matches!(raw, RawContent::Mapping(_)));
        let raw: RawContent = serde_json::from_value(json!(["x"])).unwrap();
        assert!(matches!(raw, RawContent::Sequence(_)));
        let raw: RawContent = serde_json::from_value(json!(1)).unwrap();
        assert!(matches!(raw, RawContent::Other(_)));
    }
}
