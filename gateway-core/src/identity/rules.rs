//! The ModelRule table: a process-wide, immutable, ordered list matched by
//! case-insensitive substring against the request's `model` field. First
//! match wins, so more specific entries must be listed first.

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum ThinkingConfig {
    /// Inject this object as `body.thinking` (a deep copy is taken).
    Concrete(Value),
    /// Remove any existing `body.thinking`.
    Absent,
}

#[derive(Debug, Clone)]
pub struct ModelRule {
    pub model_substring: &'static str,
    pub required_beta_flags: &'static [&'static str],
    pub thinking: ThinkingConfig,
    pub remove_temperature: bool,
    pub require_claude_code_identity: bool,
}

/// The built-in table: a large and a mid-tier model that both require the
/// CLI identity shape and adaptive thinking, and a small/fast model that
/// requires neither. Order matters even though these three substrings
/// happen not to overlap — a future entry must be inserted above any
/// broader substring it should take precedence over.
pub fn built_in_rules() -> Vec<ModelRule> {
    vec![
        ModelRule {
            model_substring: "opus",
            required_beta_flags: &["claude-code-20250219", "interleaved-thinking-2025-05-14"],
            thinking: ThinkingConfig::Concrete(serde_json::json!({
                "type": "enabled",
                "budget_tokens": 4096
            })),
            remove_temperature: true,
            require_claude_code_identity: true,
        },
        ModelRule {
            model_substring: "sonnet",
            required_beta_flags: &["claude-code-20250219", "interleaved-thinking-2025-05-14"],
            thinking: ThinkingConfig::Concrete(serde_json::json!({
                "type": "enabled",
                "budget_tokens": 2048
            })),
            remove_temperature: true,
            require_claude_code_identity: true,
        },
        ModelRule {
            model_substring: "haiku",
            required_beta_flags: &["claude-code-20250219"],
            thinking: ThinkingConfig::Absent,
            remove_temperature: false,
            require_claude_code_identity: false,
        },
    ]
}

/// First-match-wins lookup, case-insensitive.
pub fn match_rule<'a>(rules: &'a [ModelRule], model: &str) -> Option<&'a ModelRule> {
    let lower = model.to_lowercase();
    rules
        .iter()
        .find(|rule| lower.contains(&rule.model_substring.to_lowercase()))
}
