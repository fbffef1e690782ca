//! Error Classifier: turns a non-2xx upstream response into
//! `{Overload, Orphan(ids), Other}` without ever throwing.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Statuses eligible for overload classification. The canonical set per
/// historical revisions is `{500, 503, 529}`; 502 is additionally accepted
/// here (an explicitly allowed implementation choice, see DESIGN.md).
const OVERLOAD_STATUSES: [u16; 4] = [500, 502, 503, 529];

const OVERLOAD_PHRASES: &[&str] = &["overload", "rate limit", "capacity", "too many requests"];

/// "Load limit reached" (负载已经达到上限) — checked verbatim, case folding
/// does not apply to CJK text.
const OVERLOAD_CJK_PHRASE: &str = "\u{8D1F}\u{8F7D}\u{5DF2}\u{7ECF}\u{8FBE}\u{5230}\u{4E0A}\u{9650}";

// `\w` is restricted to ASCII word characters explicitly: tool identifiers
// are ASCII by specification, and the `regex` crate's `\w` is
// Unicode-aware by default.
static ORPHAN_PATTERN_PRIMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"unexpected `tool_use_id` found in `tool_result` blocks: (toolu_[A-Za-z0-9_]+)")
        .expect("primary orphan pattern is a valid regex")
});

static ORPHAN_PATTERN_SECONDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"tool result's tool id\(([^)]+)\) not found")
        .expect("secondary orphan pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Overload,
    /// Always non-empty; ids are in match order.
    Orphan(Vec<String>),
    Other,
}

fn extract_error_message(body_text: &str) -> String {
    match serde_json::from_str::<Value>(body_text) {
        Ok(v) => v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .or_else(|| v.get("message").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| body_text.to_string()),
        Err(_) => body_text.to_string(),
    }
}

fn is_overload_message(message: &str) -> bool {
    if message.contains(OVERLOAD_CJK_PHRASE) {
        return true;
    }
    let lower = message.to_lowercase();
    OVERLOAD_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

fn extract_orphan_ids(message: &str) -> Vec<String> {
    let primary: Vec<String> = ORPHAN_PATTERN_PRIMARY
        .captures_iter(message)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if !primary.is_empty() {
        return primary;
    }
    ORPHAN_PATTERN_SECONDARY
        .captures_iter(message)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Classify a non-2xx response body. `body_text` must come from a cloned
/// read of the body so the primary body stays consumable by the caller.
pub fn classify(status: u16, body_text: &str) -> Classification {
    if OVERLOAD_STATUSES.contains(&status) {
        let message = extract_error_message(body_text);
        return if is_overload_message(&message) {
            Classification::Overload
        } else {
            Classification::Other
        };
    }

    if status == 400 {
        let message = extract_error_message(body_text);
        let ids = extract_orphan_ids(&message);
        return if ids.is_empty() {
            Classification::Other
        } else {
            Classification::Orphan(ids)
        };
    }

    Classification::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_overload_from_structured_error_message() {
        let body = r#"{"error":{"message":"Overloaded"}}"#;
        assert_eq!(classify(529, body), Classification::Overload);
    }

    #[test]
    fn classifies_overload_from_flat_message_field() {
        let body = r#"{"message":"We are experiencing high capacity right now"}"#;
        assert_eq!(classify(503, body), Classification::Overload);
    }

    #[test]
    fn classifies_overload_from_cjk_phrase() {
        let body = r#"{"error":{"message":"负载已经达到上限"}}"#;
        assert_eq!(classify(529, body), Classification::Overload);
    }

    #[test]
    fn classifies_overload_on_unparseable_body_via_raw_text() {
        let body = "upstream is overloaded, try again later";
        assert_eq!(classify(500, body), Classification::Overload);
    }

    #[test]
    fn non_overload_message_on_overload_status_is_other() {
        let body = r#"{"error":{"message":"internal server error"}}"#;
        assert_eq!(classify(500, body), Classification::Other);
    }

    #[test]
    fn status_outside_overload_set_is_never_classified_as_overload() {
        let body = r#"{"error":{"message":"Overloaded"}}"#;
        assert_eq!(classify(504, body), Classification::Other);
    }

    #[test]
    fn classifies_orphan_from_primary_pattern() {
        let body = r#"{"error":{"message":"unexpected `tool_use_id` found in `tool_result` blocks: toolu_abc123"}}"#;
        assert_eq!(
            classify(400, body),
            Classification::Orphan(vec!["toolu_abc123".to_string()])
        );
    }

    #[test]
    fn classifies_orphan_from_secondary_pattern() {
        let body = r#"{"error":{"message":"tool result's tool id(toolu_xyz) not found"}}"#;
        assert_eq!(
            classify(400, body),
            Classification::Orphan(vec!["toolu_xyz".to_string()])
        );
    }

    #[test]
    fn orphan_pattern_only_considered_for_400() {
        let body = r#"{"error":{"message":"unexpected `tool_use_id` found in `tool_result` blocks: toolu_abc"}}"#;
        assert_eq!(classify(422, body), Classification::Other);
    }

    #[test]
    fn unmatched_400_body_is_other() {
        let body = r#"{"error":{"message":"model not found"}}"#;
        assert_eq!(classify(400, body), Classification::Other);
    }

    #[test]
    fn malformed_json_never_panics_and_yields_other_for_400() {
        let body = "not json at all";
        assert_eq!(classify(400, body), Classification::Other);
    }
}
