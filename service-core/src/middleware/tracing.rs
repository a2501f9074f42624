use axum::http::{HeaderMap, HeaderValue};
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id for the current request, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Caller-supplied id when it is usable as a header value, otherwise a fresh v4.
fn resolve_request_id(headers: &HeaderMap) -> (String, HeaderValue) {
    let supplied = headers
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .and_then(|v| v.to_str().ok().map(|s| (s.to_string(), v.clone())));

    supplied.unwrap_or_else(|| {
        let id = Uuid::new_v4().to_string();
        // A hyphenated UUID is always a valid header value.
        let value = HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("-"));
        (id, value)
    })
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let (request_id, header_value) = resolve_request_id(req.headers());

    req.headers_mut()
        .insert(REQUEST_ID_HEADER, header_value.clone());
    req.extensions_mut().insert(RequestId(request_id));

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(REQUEST_ID_HEADER, header_value);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_supplied_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));
        let (id, value) = resolve_request_id(&headers);
        assert_eq!(id, "req-42");
        assert_eq!(value, "req-42");
    }

    #[test]
    fn test_replaces_oversized_id() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        let (id, _) = resolve_request_id(&headers);
        assert_ne!(id, long);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
