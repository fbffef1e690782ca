//! Component D: the Retry Orchestrator. Composes proactive cleanup,
//! dispatch, bounded overload backoff, streaming pass-through, and a
//! single orphan-repair retry into one state machine per request.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::classifier::{classify, Classification};
use crate::conversation::{scan_and_strip_all, targeted_remove};
use crate::dispatcher::{DispatchResponse, Dispatcher};
use crate::error::{GatewayError, Result};
use crate::streaming::is_streaming;

pub const MAX_OVERLOAD_RETRIES: u32 = 2;
const OVERLOAD_BACKOFF_MS: [u64; MAX_OVERLOAD_RETRIES as usize] = [1000, 2000];
const ORPHAN_REPAIR_DELAY_MS: u64 = 100;
const OVERLOAD_STATUSES: [u16; 4] = [500, 502, 503, 529];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ProactiveSuccess,
    RetrySuccess,
}

#[derive(Debug, Clone, Default)]
pub struct RetryMetadata {
    pub proactive_removed_ids: Vec<String>,
    pub removed_tool_use_ids: Vec<String>,
    pub retry_count: u32,
    pub outcome: Option<Outcome>,
}

fn serialize(body: &Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(body)?))
}

fn set_messages(body: &mut Value, messages: Vec<Value>) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("messages".to_string(), Value::Array(messages));
    }
}

fn current_messages(body: &Value) -> Vec<Value> {
    body.get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn label_outcome(retry_count: u32, had_proactive_orphans: bool) -> Outcome {
    if retry_count > 0 {
        Outcome::RetrySuccess
    } else if had_proactive_orphans {
        Outcome::ProactiveSuccess
    } else {
        Outcome::Success
    }
}

/// Body reads for classification are gated by status code, never by
/// content-type: a streaming 2xx never reaches either of these checks
/// because the overload loop and the orphan-repair branch only read a
/// body when `resp.status` is already known to be one they care about.
async fn classify_overload(resp: &mut DispatchResponse) -> Result<bool> {
    if !OVERLOAD_STATUSES.contains(&resp.status.as_u16()) {
        return Ok(false);
    }
    let body = resp.read_body().await?;
    let text = String::from_utf8_lossy(&body);
    Ok(matches!(classify(resp.status.as_u16(), &text), Classification::Overload))
}

/// Returns the orphaned ids cited by a 400 response, or `None` if the
/// status isn't 400 or the body doesn't match either orphan pattern.
async fn classify_orphan(resp: &mut DispatchResponse) -> Result<Option<Vec<String>>> {
    if resp.status != StatusCode::BAD_REQUEST {
        return Ok(None);
    }
    let body = resp.read_body().await?;
    let text = String::from_utf8_lossy(&body);
    Ok(match classify(resp.status.as_u16(), &text) {
        Classification::Orphan(ids) => Some(ids),
        _ => None,
    })
}

/// Whether `execute_with_cleanup` should be invoked at all for this body.
/// When false, the caller dispatches the request directly without any
/// sanitization or retry behavior.
pub fn is_eligible(body: &Value) -> bool {
    body.is_object() && body.get("messages").is_some_and(Value::is_array)
}

/// `S0..S6` from the design: proactive cleanup, dispatch, bounded overload
/// retry, streaming/success short-circuits, and a single orphan-repair
/// attempt, in that order.
pub async fn execute_with_cleanup(
    dispatcher: &dyn Dispatcher,
    method: Method,
    url: &str,
    headers: HeaderMap,
    mut body: Value,
) -> Result<(DispatchResponse, RetryMetadata)> {
    if !is_eligible(&body) {
        return Err(GatewayError::MalformedBody);
    }

    let mut metadata = RetryMetadata::default();

    // S0 Proactive
    let scan = scan_and_strip_all(&current_messages(&body));
    set_messages(&mut body, scan.messages);
    metadata.proactive_removed_ids = scan.removed_ids;
    let had_proactive_orphans = scan.had_orphans;

    let body_bytes = serialize(&body)?;

    // S1 Dispatch(1)
    let mut resp = dispatcher
        .send(method.clone(), url, headers.clone(), body_bytes.clone())
        .await?;

    // S2 OverloadLoop
    for attempt in 1..=MAX_OVERLOAD_RETRIES {
        if !classify_overload(&mut resp).await? {
            break;
        }
        metadata.retry_count = attempt;
        let backoff_ms = OVERLOAD_BACKOFF_MS[(attempt - 1) as usize];
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        resp = dispatcher
            .send(method.clone(), url, headers.clone(), body_bytes.clone())
            .await?;
    }

    // S3 StreamingGate
    if is_streaming(&resp.headers) {
        metadata.outcome = Some(label_outcome(metadata.retry_count, had_proactive_orphans));
        return Ok((resp, metadata));
    }

    // S4 Success
    if resp.status.is_success() {
        metadata.outcome = Some(label_outcome(metadata.retry_count, had_proactive_orphans));
        return Ok((resp, metadata));
    }

    // S5 OrphanRepair — at most one reactive attempt, ever, per invocation.
    if let Some(ids) = classify_orphan(&mut resp).await? {
        if let Some(first_id) = ids.first() {
            let cleaned = targeted_remove(&current_messages(&body), first_id);
            set_messages(&mut body, cleaned);
            metadata.removed_tool_use_ids.extend(ids);
            metadata.retry_count += 1;

            tokio::time::sleep(Duration::from_millis(ORPHAN_REPAIR_DELAY_MS)).await;

            let retry_bytes = serialize(&body)?;
            let resp2 = dispatcher
                .send(method.clone(), url, headers.clone(), retry_bytes)
                .await?;
            let repaired = is_streaming(&resp2.headers) || resp2.status.is_success();
            metadata.outcome = Some(if repaired {
                Outcome::RetrySuccess
            } else {
                Outcome::Success
            });
            return Ok((resp2, metadata));
        }
    }

    // S6 Other
    metadata.outcome = Some(label_outcome(metadata.retry_count, had_proactive_orphans));
    Ok((resp, metadata))
}
