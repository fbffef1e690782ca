//! The one route that matters: forward every request to the upstream,
//! shaped and retried by `gateway-core`.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::Extension;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use gateway_core::{
    execute_with_cleanup, is_eligible, normalize, DispatchResponse, Dispatcher, OutgoingBody,
};
use serde_json::Value;
use std::sync::Arc;

use crate::server::GatewayState;

pub fn router() -> Router {
    Router::new().route("/{*path}", any(proxy_handler))
}

#[tracing::instrument(level = "debug", skip(state, headers, body), fields(method = %method, path = %uri.path()))]
async fn proxy_handler(
    Extension(state): Extension<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target_url = build_target_url(&state.config.upstream.base_url, &uri);
    let target_host = upstream_host(&state.config.upstream.base_url);

    match serde_json::from_slice::<Value>(&body) {
        Ok(mut json_body) if is_eligible(&json_body) => {
            normalize(
                &target_host,
                &state.config.upstream.identity_host_substring,
                &mut headers,
                &mut json_body,
                &state.catalog,
                &state.rules,
            );
            match execute_with_cleanup(&state.dispatcher, method, &target_url, headers, json_body)
                .await
            {
                Ok((resp, metadata)) => {
                    tracing::debug!(
                        retry_count = metadata.retry_count,
                        outcome = ?metadata.outcome,
                        "request completed"
                    );
                    into_axum_response(resp)
                }
                Err(e) => {
                    tracing::error!(error = %e, "gateway orchestration failed");
                    (StatusCode::BAD_GATEWAY, "gateway orchestration failed").into_response()
                }
            }
        }
        Ok(mut json_body) => {
            normalize(
                &target_host,
                &state.config.upstream.identity_host_substring,
                &mut headers,
                &mut json_body,
                &state.catalog,
                &state.rules,
            );
            let out_bytes = serde_json::to_vec(&json_body)
                .map(Bytes::from)
                .unwrap_or(body);
            dispatch_once(&state, method, &target_url, headers, out_bytes).await
        }
        Err(_) => dispatch_once(&state, method, &target_url, headers, body).await,
    }
}

async fn dispatch_once(
    state: &GatewayState,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.dispatcher.send(method, url, headers, body).await {
        Ok(resp) => into_axum_response(resp),
        Err(e) => {
            tracing::error!(error = %e, "upstream dispatch failed");
            (StatusCode::BAD_GATEWAY, "upstream dispatch failed").into_response()
        }
    }
}

fn into_axum_response(resp: DispatchResponse) -> Response {
    let status = resp.status;
    let headers = resp.headers.clone();
    let mut builder = Response::builder().status(status);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    let body = match resp.into_outgoing() {
        OutgoingBody::Bytes(bytes) => Body::from(bytes),
        OutgoingBody::Stream(stream) => Body::from_stream(stream),
    };
    builder
        .body(body)
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "malformed upstream response").into_response())
}

fn build_target_url(base_url: &str, uri: &Uri) -> String {
    let suffix = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}{}", base_url.trim_end_matches('/'), suffix)
}

fn upstream_host(base_url: &str) -> String {
    let without_scheme = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_joins_base_and_path_and_query() {
        let uri: Uri = "/v1/messages?beta=true".parse().unwrap();
        assert_eq!(
            build_target_url("https://upstream.internal/", &uri),
            "https://upstream.internal/v1/messages?beta=true"
        );
    }

    #[test]
    fn upstream_host_strips_scheme_and_path() {
        assert_eq!(
            upstream_host("https://Api.Upstream.Internal:443/root"),
            "api.upstream.internal:443"
        );
    }
}
