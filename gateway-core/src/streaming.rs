//! Streaming Gate: decides whether a response's body must be treated as an
//! opaque byte stream the core is forbidden to read.

use http::HeaderMap;

/// True iff `content-type` contains `text/event-stream` or
/// `transfer-encoding` contains `chunked`. Streaming-shaped responses must
/// never be buffered or cloned by the core, with one narrow exception
/// handled upstream of this check: a 400 body may still be cloned for
/// orphan-pattern classification before the streaming verdict is acted on.
pub fn is_streaming(headers: &HeaderMap) -> bool {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let transfer_encoding = headers
        .get("transfer-encoding")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    content_type.contains("text/event-stream") || transfer_encoding.contains("chunked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn event_stream_content_type_is_streaming() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/event-stream; charset=utf-8"));
        assert!(is_streaming(&headers));
    }

    #[test]
    fn chunked_transfer_encoding_is_streaming() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        assert!(is_streaming(&headers));
    }

    #[test]
    fn plain_json_response_is_not_streaming() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        assert!(!is_streaming(&headers));
    }

    #[test]
    fn absent_headers_are_not_streaming() {
        let headers = HeaderMap::new();
        assert!(!is_streaming(&headers));
    }
}
