//! Request-shaping and retry core for the gateway: conversation
//! sanitization, upstream identity normalization, and the retry
//! orchestrator that composes them around a dispatched HTTP round-trip.
//!
//! This crate is deliberately decoupled from any particular HTTP server
//! framework — it speaks in `http`/`bytes`/`serde_json` terms so it can be
//! unit-tested without a running network stack. `gateway-app` wires it to
//! `axum` and `reqwest`.

mod classifier;
mod conversation;
mod dispatcher;
mod error;
mod identity;
mod orchestrator;
mod streaming;

pub use classifier::{classify, Classification};
pub use conversation::{scan_and_strip_all, targeted_remove, ScanStripOutcome};
pub use dispatcher::{BodyStream, DispatchResponse, Dispatcher, OutgoingBody, ReqwestDispatcher};
pub use error::{GatewayError, Result};
pub use identity::{built_in_rules, normalize, select_rule, IdentityCatalog, ModelRule, ThinkingConfig};
pub use orchestrator::{execute_with_cleanup, is_eligible, Outcome, RetryMetadata, MAX_OVERLOAD_RETRIES};
pub use streaming::is_streaming;
