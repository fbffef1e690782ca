//! Message Sanitizer: detects and elides orphaned `tool_result` blocks.
//!
//! Conversations are free-form JSON (`serde_json::Value`); blocks carry
//! whatever extra fields a client or upstream attaches (`cache_control`,
//! image sources, etc.), so both operations here clone messages wholesale
//! and only ever touch the `content` array, never reinterpreting the rest
//! of a message through a strict schema.

use serde_json::Value;
use std::collections::HashSet;

/// Outcome of a full conversation scan.
#[derive(Debug, Clone)]
pub struct ScanStripOutcome {
    pub messages: Vec<Value>,
    pub removed_ids: Vec<String>,
    pub had_orphans: bool,
}

fn content_array(message: &Value) -> Option<&Vec<Value>> {
    message.get("content")?.as_array()
}

fn block_type(block: &Value) -> Option<&str> {
    block.get("type")?.as_str()
}

fn block_str_field<'a>(block: &'a Value, field: &str) -> Option<&'a str> {
    block.get(field)?.as_str()
}

/// tool_use identifiers declared anywhere in the conversation, across every
/// role. Scanning assistant *and* user/system turns is deliberate: if a
/// client mislabels a turn, its tool_use declarations are still honored.
fn collect_use_ids(messages: &[Value]) -> HashSet<&str> {
    let mut ids = HashSet::new();
    for message in messages {
        let Some(blocks) = content_array(message) else {
            continue;
        };
        for block in blocks {
            if block_type(block) == Some("tool_use") {
                if let Some(id) = block_str_field(block, "id") {
                    ids.insert(id);
                }
            }
        }
    }
    ids
}

/// Returns a deep copy of `messages` with every `tool_result` block whose
/// `tool_use_id` satisfies `is_orphan` removed. Message order, block order,
/// and every other field on the message and surviving blocks are untouched.
fn strip_blocks_where(messages: &[Value], mut is_orphan: impl FnMut(&str) -> bool) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let Some(blocks) = content_array(message) else {
                return message.clone();
            };
            let retained: Vec<Value> = blocks
                .iter()
                .filter(|block| match block_type(block) {
                    Some("tool_result") => match block_str_field(block, "tool_use_id") {
                        Some(id) => !is_orphan(id),
                        None => true,
                    },
                    _ => true,
                })
                .cloned()
                .collect();
            let mut out = message.clone();
            if let Some(obj) = out.as_object_mut() {
                obj.insert("content".to_string(), Value::Array(retained));
            }
            out
        })
        .collect()
}

/// Proactive, whole-conversation pass. If no `tool_result` block references
/// an unknown `tool_use_id`, the input is returned unchanged (structurally
/// equal, new allocation) and `had_orphans` is false.
pub fn scan_and_strip_all(messages: &[Value]) -> ScanStripOutcome {
    let known = collect_use_ids(messages);
    let mut removed_ids: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for message in messages {
        let Some(blocks) = content_array(message) else {
            continue;
        };
        for block in blocks {
            if block_type(block) != Some("tool_result") {
                continue;
            }
            if let Some(id) = block_str_field(block, "tool_use_id") {
                if !known.contains(id) && seen.insert(id) {
                    removed_ids.push(id.to_string());
                }
            }
        }
    }

    if removed_ids.is_empty() {
        return ScanStripOutcome {
            messages: messages.to_vec(),
            removed_ids,
            had_orphans: false,
        };
    }

    let orphan_set: HashSet<&str> = removed_ids.iter().map(String::as_str).collect();
    let stripped = strip_blocks_where(messages, |id| orphan_set.contains(id));
    ScanStripOutcome {
        messages: stripped,
        removed_ids,
        had_orphans: true,
    }
}

/// Reactive, single-identifier removal used only for the one-shot repair
/// after upstream cites a specific dangling `tool_use_id`.
pub fn targeted_remove(messages: &[Value], tool_use_id: &str) -> Vec<Value> {
    strip_blocks_where(messages, |id| id == tool_use_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_orphan_and_keeps_known_tool_result() {
        let messages = vec![
            json!({
                "role": "assistant",
                "content": [{"type": "tool_use", "id": "toolu_A", "name": "x", "input": {}}],
            }),
            json!({
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_A"},
                    {"type": "tool_result", "tool_use_id": "toolu_GHOST"},
                ],
            }),
        ];

        let outcome = scan_and_strip_all(&messages);
        assert!(outcome.had_orphans);
        assert_eq!(outcome.removed_ids, vec!["toolu_GHOST".to_string()]);
        let second = &outcome.messages[1]["content"];
        assert_eq!(second.as_array().unwrap().len(), 1);
        assert_eq!(second[0]["tool_use_id"], "toolu_A");
    }

    #[test]
    fn clean_conversation_is_unchanged_and_reports_no_orphans() {
        let messages = vec![
            json!({"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_A"}]}),
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_A"}]}),
        ];

        let outcome = scan_and_strip_all(&messages);
        assert!(!outcome.had_orphans);
        assert!(outcome.removed_ids.is_empty());
        assert_eq!(outcome.messages, messages);
    }

    #[test]
    fn use_id_recognized_regardless_of_declaring_role() {
        // A tool_use block under a `user` role (mislabeled turn) still
        // counts as a declaration.
        let messages = vec![
            json!({"role": "user", "content": [{"type": "tool_use", "id": "toolu_A"}]}),
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_A"}]}),
        ];

        let outcome = scan_and_strip_all(&messages);
        assert!(!outcome.had_orphans);
    }

    #[test]
    fn empty_content_arrays_are_preserved_not_deleted() {
        let messages = vec![json!({"role": "user", "content": []})];
        let outcome = scan_and_strip_all(&messages);
        assert!(!outcome.had_orphans);
        assert_eq!(outcome.messages[0]["content"], json!([]));
    }

    #[test]
    fn message_count_is_never_changed_even_when_content_becomes_empty() {
        let messages = vec![
            json!({"role": "assistant", "content": []}),
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_GHOST"}]}),
        ];
        let outcome = scan_and_strip_all(&messages);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[1]["content"], json!([]));
    }

    #[test]
    fn identifiers_are_compared_byte_exact_not_normalized() {
        let messages = vec![
            json!({"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_ABC"}]}),
            json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "TOOLU_ABC"}]}),
        ];
        let outcome = scan_and_strip_all(&messages);
        assert!(outcome.had_orphans);
        assert_eq!(outcome.removed_ids, vec!["TOOLU_ABC".to_string()]);
    }

    #[test]
    fn targeted_remove_only_drops_the_named_identifier() {
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "tool_result", "tool_use_id": "toolu_X"},
                {"type": "tool_result", "tool_use_id": "toolu_Y"},
            ],
        })];

        let out = targeted_remove(&messages, "toolu_X");
        let content = out[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["tool_use_id"], "toolu_Y");
    }

    #[test]
    fn non_tool_result_blocks_are_never_touched() {
        let messages = vec![json!({
            "role": "assistant",
            "content": [{"type": "text", "text": "hello"}],
        })];
        let outcome = scan_and_strip_all(&messages);
        assert_eq!(outcome.messages, messages);
    }
}
