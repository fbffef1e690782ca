//! Identity Normalizer: a model-dispatched, fixed-order rewrite of headers
//! and body so that a generic client becomes indistinguishable, to an
//! impersonation-sensitive upstream, from the first-party CLI.

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use uuid::Uuid;

use super::catalog::{
    IdentityCatalog, BILLING_SENTINEL, CLI_BETA_FLAG, CLI_USER_AGENT_PREFIX,
    FINGERPRINT_BLOCKLIST, FINGERPRINT_IDENTITY_HEADERS, PROTOCOL_CRITICAL_HEADERS,
};
use super::rules::{match_rule, ModelRule, ThinkingConfig};

static USER_ID_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^user_[a-f0-9]+_account__session_[0-9a-f-]{36}$")
        .expect("user id pattern is a valid regex")
});

const DEFAULT_MAX_TOKENS: u64 = 32_000;
const INSTRUCTIONS_LENGTH_HEURISTIC: usize = 5000;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

fn remove_header(headers: &mut HeaderMap, name: &str) {
    if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
        headers.remove(name);
    }
}

/// Activation guard: target host, body shape, and a matched rule must all
/// hold, or the request passes through untouched.
pub fn select_rule<'a>(
    target_host: &str,
    identity_host_substring: &str,
    body: &Value,
    rules: &'a [ModelRule],
) -> Option<&'a ModelRule> {
    if !target_host
        .to_lowercase()
        .contains(&identity_host_substring.to_lowercase())
    {
        return None;
    }
    if !body.is_object() {
        return None;
    }
    let model = body.get("model")?.as_str()?;
    match_rule(rules, model)
}

fn first_system_text(body: &Value) -> Option<&str> {
    match body.get("system")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(blocks) => blocks.first()?.get("text")?.as_str(),
        obj @ Value::Object(_) => obj.get("text")?.as_str(),
        _ => None,
    }
}

/// Step 0. Must run before step 1 mutates the beta header, or the CLI beta
/// flag would always appear present afterward.
fn detect_is_cli(headers: &HeaderMap, body: &Value) -> bool {
    let ua_match = header_str(headers, "user-agent")
        .map(|ua| ua.starts_with(CLI_USER_AGENT_PREFIX))
        .unwrap_or(false);
    let beta_match = header_str(headers, "anthropic-beta")
        .map(|beta| beta.split(',').map(str::trim).any(|t| t == CLI_BETA_FLAG))
        .unwrap_or(false);
    let billing_match = first_system_text(body)
        .map(|text| text.contains(BILLING_SENTINEL))
        .unwrap_or(false);
    ua_match || beta_match || billing_match
}

/// Step 1. Order-preserving union; client-negotiated flags are never
/// dropped, required flags are appended in rule-declaration order.
fn merge_beta_flags(headers: &mut HeaderMap, required: &[&str]) {
    let existing = header_str(headers, "anthropic-beta").unwrap_or("").to_string();
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    for token in existing.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if seen.insert(token.to_string()) {
            ordered.push(token.to_string());
        }
    }
    for token in required {
        if seen.insert(token.to_string()) {
            ordered.push(token.to_string());
        }
    }
    set_header(headers, "anthropic-beta", &ordered.join(","));
}

/// Step 2.
fn apply_thinking(body: &mut Value, config: &ThinkingConfig) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    match config {
        ThinkingConfig::Concrete(value) => {
            obj.insert("thinking".to_string(), value.clone());
        }
        ThinkingConfig::Absent => {
            obj.remove("thinking");
        }
    }
}

/// Step 3.
fn strip_temperature(body: &mut Value) {
    if let Some(obj) = body.as_object_mut() {
        obj.remove("temperature");
    }
}

/// Step 4.
fn apply_fingerprint_hygiene(headers: &mut HeaderMap, is_cli: bool) {
    for name in FINGERPRINT_BLOCKLIST {
        remove_header(headers, name);
    }
    for (name, value) in PROTOCOL_CRITICAL_HEADERS {
        set_header(headers, name, value);
    }
    for (name, value) in FINGERPRINT_IDENTITY_HEADERS {
        if headers.contains_key(*name) {
            if !is_cli {
                set_header(headers, name, value);
            }
        } else {
            set_header(headers, name, value);
        }
    }
}

/// Step 5.
fn normalize_authorization(headers: &mut HeaderMap) {
    if headers.contains_key("authorization") {
        return;
    }
    let Some(api_key) = header_str(headers, "x-api-key").map(str::to_string) else {
        return;
    };
    set_header(headers, "authorization", &format!("Bearer {api_key}"));
    remove_header(headers, "x-api-key");
}

fn system_as_array(body: &Value) -> Vec<Value> {
    match body.get("system") {
        Some(Value::Array(arr)) => arr.clone(),
        Some(Value::String(s)) if !s.is_empty() => vec![json!({"type": "text", "text": s})],
        Some(obj @ Value::Object(map)) if map.contains_key("type") => vec![obj.clone()],
        _ => Vec::new(),
    }
}

fn set_system(body: &mut Value, blocks: Vec<Value>) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("system".to_string(), Value::Array(blocks));
    }
}

fn block_text(block: &Value) -> Option<&str> {
    block.get("text")?.as_str()
}

fn ensure_cache_control(block: &mut Value) {
    if let Some(obj) = block.as_object_mut() {
        obj.insert("cache_control".to_string(), json!({"type": "ephemeral"}));
    }
}

fn with_cache_control(mut block: Value) -> Value {
    ensure_cache_control(&mut block);
    block
}

fn identity_and_instructions_blocks(catalog: &IdentityCatalog) -> Vec<Value> {
    vec![
        with_cache_control(json!({"type": "text", "text": catalog.identity_prefix})),
        with_cache_control(json!({"type": "text", "text": catalog.instructions})),
    ]
}

fn canonical_prefix_blocks(catalog: &IdentityCatalog) -> Vec<Value> {
    let mut blocks = Vec::new();
    if !catalog.billing_text.is_empty() {
        blocks.push(json!({"type": "text", "text": catalog.billing_text}));
    }
    blocks.extend(identity_and_instructions_blocks(catalog));
    blocks
}

/// Path (a): request is already CLI-shaped; repair only what's missing.
fn apply_path_a(body: &mut Value, catalog: &IdentityCatalog) {
    let mut blocks = system_as_array(body);

    if blocks.is_empty() {
        blocks = canonical_prefix_blocks(catalog);
    } else if block_text(&blocks[0])
        .map(|t| t.contains(BILLING_SENTINEL))
        .unwrap_or(false)
    {
        if let Some(second) = blocks.get_mut(1) {
            ensure_cache_control(second);
        }
    } else if block_text(&blocks[0])
        .map(|t| t.starts_with(catalog.identity_prefix.as_str()))
        .unwrap_or(false)
    {
        ensure_cache_control(&mut blocks[0]);
        let has_instructions = blocks
            .iter()
            .any(|b| block_text(b).map(|t| t.len() > INSTRUCTIONS_LENGTH_HEURISTIC).unwrap_or(false));
        if !has_instructions {
            blocks.push(with_cache_control(
                json!({"type": "text", "text": catalog.instructions}),
            ));
        }
        // No billing insert here: an identity-prefixed-but-billing-less system
        // array is exactly what path (b)'s spoof produces (see Open Question
        // (d) in DESIGN.md), and re-normalizing that output must be a fixed
        // point. Billing is only ever introduced fresh in
        // `canonical_prefix_blocks`, or carried forward by the branch above
        // when it was already present.
    } else {
        let mut prefix = canonical_prefix_blocks(catalog);
        prefix.extend(blocks);
        blocks = prefix;
    }

    set_system(body, blocks);
}

/// Path (b): a generic client is spoofed into the CLI shape.
fn apply_path_b(body: &mut Value, catalog: &IdentityCatalog) {
    let blocks = system_as_array(body);
    let already_present = blocks
        .iter()
        .any(|b| block_text(b).map(|t| t.contains(catalog.identity_prefix.as_str())).unwrap_or(false));

    let result = if already_present {
        blocks
    } else {
        let mut prefix = identity_and_instructions_blocks(catalog);
        prefix.extend(blocks);
        prefix
    };

    set_system(body, result);
}

/// Path (c): rule doesn't require identity enforcement at all.
fn apply_path_c(body: &mut Value, catalog: &IdentityCatalog) {
    let missing_or_empty = match body.get("system") {
        None | Some(Value::Null) => true,
        Some(Value::Array(arr)) => arr.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    };
    if missing_or_empty {
        set_system(body, vec![json!({"type": "text", "text": catalog.identity_prefix})]);
    }

    let tools_invalid = !matches!(body.get("tools"), Some(Value::Array(_)));
    if tools_invalid {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("tools".to_string(), Value::Array(Vec::new()));
        }
    }

    if body.get("metadata").is_none() {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "metadata".to_string(),
                json!({"user_id": synthesize_user_id()}),
            );
        }
    }
}

fn inject_tools_if_empty(body: &mut Value, catalog: &IdentityCatalog) {
    let needs_injection = match body.get("tools") {
        Some(Value::Array(arr)) => arr.is_empty(),
        _ => true,
    };
    if needs_injection {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("tools".to_string(), Value::Array(catalog.tools.clone()));
        }
    }
}

fn synthesize_user_id() -> String {
    let mut rng = rand::thread_rng();
    let hi = rng.next_u64();
    let lo = rng.next_u64();
    let hex = format!("{hi:016x}{lo:016x}");
    let session = Uuid::new_v4();
    format!("user_{hex}_account__session_{session}")
}

fn enforce_user_id(body: &mut Value) {
    let valid = body
        .get("metadata")
        .and_then(|m| m.get("user_id"))
        .and_then(Value::as_str)
        .map(|id| USER_ID_PATTERN.is_match(id))
        .unwrap_or(false);
    if valid {
        return;
    }
    let fresh = synthesize_user_id();
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    let metadata = obj.entry("metadata").or_insert_with(|| json!({}));
    if let Some(meta_obj) = metadata.as_object_mut() {
        meta_obj.insert("user_id".to_string(), json!(fresh));
    }
}

/// Step 6 dispatch across the three sub-paths.
fn apply_body_shape(body: &mut Value, rule: &ModelRule, is_cli: bool, catalog: &IdentityCatalog) {
    if !rule.require_claude_code_identity {
        apply_path_c(body, catalog);
        return;
    }
    if is_cli {
        apply_path_a(body, catalog);
    } else {
        apply_path_b(body, catalog);
    }
    inject_tools_if_empty(body, catalog);
    enforce_user_id(body);
}

/// Step 7.
fn apply_default_max_tokens(body: &mut Value) {
    let falsy = match body.get("max_tokens") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        _ => false,
    };
    if falsy {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("max_tokens".to_string(), json!(DEFAULT_MAX_TOKENS));
        }
    }
}

/// Step 8.
fn strip_content_length(headers: &mut HeaderMap) {
    remove_header(headers, "content-length");
}

/// Runs the full fixed-order normalization, or does nothing and returns
/// `false` if the activation guard does not hold.
pub fn normalize(
    target_host: &str,
    identity_host_substring: &str,
    headers: &mut HeaderMap,
    body: &mut Value,
    catalog: &IdentityCatalog,
    rules: &[ModelRule],
) -> bool {
    let Some(rule) = select_rule(target_host, identity_host_substring, &*body, rules) else {
        return false;
    };

    let is_cli = detect_is_cli(headers, body);

    merge_beta_flags(headers, rule.required_beta_flags);
    apply_thinking(body, &rule.thinking);
    if rule.remove_temperature {
        strip_temperature(body);
    }
    apply_fingerprint_hygiene(headers, is_cli);
    normalize_authorization(headers);
    apply_body_shape(body, rule, is_cli, catalog);
    apply_default_max_tokens(body);
    strip_content_length(headers);

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::rules::built_in_rules;

    const IDENTITY_HOST: &str = "api.anthropic-compatible.internal";

    fn catalog() -> IdentityCatalog {
        IdentityCatalog::builtin()
    }

    #[test]
    fn non_matching_host_passes_through_untouched() {
        let mut headers = HeaderMap::new();
        let mut body = json!({"model": "claude-sonnet-4", "messages": []});
        let rules = built_in_rules();
        let applied = normalize("somewhere-else.example", IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert!(!applied);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn beta_flags_merge_order_preserving_without_duplicates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "anthropic-beta",
            HeaderValue::from_static("context-1m-2025-08-07,structured-outputs-2025-12-15"),
        );
        let mut body = json!({"model": "claude-opus-4", "messages": []});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert_eq!(
            header_str(&headers, "anthropic-beta").unwrap(),
            "context-1m-2025-08-07,structured-outputs-2025-12-15,claude-code-20250219,interleaved-thinking-2025-05-14"
        );
    }

    #[test]
    fn generic_client_is_spoofed_into_cli_shape() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0 (Macintosh)"));
        let mut body = json!({
            "model": "claude-sonnet-4",
            "messages": [],
            "system": "You are a helpful assistant.",
        });
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);

        assert_eq!(
            header_str(&headers, "user-agent").unwrap(),
            "claude-cli/1.0.0 (external, cli)"
        );
        for blocked in FINGERPRINT_BLOCKLIST {
            assert!(!headers.contains_key(*blocked));
        }
        let system = body["system"].as_array().unwrap();
        assert_eq!(system.len(), 3);
        assert_eq!(system[2]["text"], "You are a helpful assistant.");
        let user_id = body["metadata"]["user_id"].as_str().unwrap();
        assert!(USER_ID_PATTERN.is_match(user_id));
    }

    #[test]
    fn cli_caller_fingerprint_headers_are_preserved() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("claude-cli/0.9.0"));
        let mut body = json!({"model": "claude-opus-4", "messages": []});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert_eq!(header_str(&headers, "user-agent").unwrap(), "claude-cli/0.9.0");
    }

    #[test]
    fn protocol_critical_headers_always_set() {
        let mut headers = HeaderMap::new();
        let mut body = json!({"model": "claude-sonnet-4", "messages": []});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        for (name, value) in PROTOCOL_CRITICAL_HEADERS {
            assert_eq!(header_str(&headers, name), Some(*value));
        }
    }

    #[test]
    fn api_key_is_promoted_to_bearer_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-test-123"));
        let mut body = json!({"model": "claude-sonnet-4", "messages": []});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert_eq!(header_str(&headers, "authorization").unwrap(), "Bearer sk-test-123");
        assert!(!headers.contains_key("x-api-key"));
    }

    #[test]
    fn temperature_removed_and_thinking_injected_for_thinking_models() {
        let mut headers = HeaderMap::new();
        let mut body = json!({"model": "claude-sonnet-4", "messages": [], "temperature": 0.7});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert!(body.get("temperature").is_none());
        assert!(body.get("thinking").is_some());
    }

    #[test]
    fn small_model_path_c_defaults_are_minimal() {
        let mut headers = HeaderMap::new();
        let mut body = json!({"model": "claude-haiku-4", "messages": []});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        let system = body["system"].as_array().unwrap();
        assert_eq!(system.len(), 1);
        assert_eq!(body["tools"], json!([]));
        assert!(body["metadata"]["user_id"].as_str().is_some());
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn invalid_user_id_is_replaced_valid_one_preserved() {
        let mut headers = HeaderMap::new();
        let mut body = json!({
            "model": "claude-opus-4",
            "messages": [],
            "metadata": {"user_id": "not-a-real-id"},
        });
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        let id = body["metadata"]["user_id"].as_str().unwrap();
        assert!(USER_ID_PATTERN.is_match(id));
        assert_ne!(id, "not-a-real-id");
    }

    #[test]
    fn max_tokens_defaulted_when_falsy() {
        let mut headers = HeaderMap::new();
        let mut body = json!({"model": "claude-opus-4", "messages": [], "max_tokens": 0});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert_eq!(body["max_tokens"], json!(32000));
    }

    #[test]
    fn stream_flag_is_never_forced() {
        let mut headers = HeaderMap::new();
        let mut body = json!({"model": "claude-opus-4", "messages": [], "stream": false});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert_eq!(body["stream"], json!(false));
    }

    #[test]
    fn content_length_header_is_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("128"));
        let mut body = json!({"model": "claude-opus-4", "messages": []});
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert!(!headers.contains_key("content-length"));
    }

    #[test]
    fn normalizing_twice_is_idempotent() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        let mut body = json!({
            "model": "claude-sonnet-4",
            "messages": [],
            "system": "You are a helpful assistant.",
        });
        let rules = built_in_rules();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        let once = body.clone();
        normalize(IDENTITY_HOST, IDENTITY_HOST, &mut headers, &mut body, &catalog(), &rules);
        assert_eq!(once, body);
    }
}
