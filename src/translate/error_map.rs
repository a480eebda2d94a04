//! Map upstream HTTP failures onto the client-facing error taxonomy.

use serde_json::Value;

use crate::error::{ApiError, ApiErrorKind};

const MAX_RAW_MESSAGE: usize = 500;

/// Classify an upstream error response. Total: every status and body yields an [`ApiError`].
///
/// The body may be an Anthropic error (`{"type":"error","error":{"type","message"}}`),
/// an `OpenAI` error (`{"error":{"message","type","code"}}`), a bare `{"message"}`,
/// `{"error":"text"}`, or arbitrary text.
pub fn map_error(status: u16, body: &str) -> ApiError {
    let kind = kind_for_status(status);

    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let (message, error_type, request_id) = match parsed {
        Some(ref value) => extract_fields(value),
        None => (None, None, None),
    };

    let message = message.unwrap_or_else(|| {
        let raw = body.trim();
        if raw.is_empty() || parsed.is_some() {
            "Unknown error".to_string()
        } else {
            truncate(raw, MAX_RAW_MESSAGE).to_string()
        }
    });

    ApiError {
        kind,
        status,
        message,
        error_type,
        request_id,
    }
}

pub fn kind_for_status(status: u16) -> ApiErrorKind {
    match status {
        400 => ApiErrorKind::BadRequest,
        401 => ApiErrorKind::Authentication,
        403 => ApiErrorKind::PermissionDenied,
        404 => ApiErrorKind::NotFound,
        429 => ApiErrorKind::RateLimit,
        500..=599 => ApiErrorKind::InternalServer,
        _ => ApiErrorKind::Api,
    }
}

fn extract_fields(value: &Value) -> (Option<String>, Option<String>, Option<String>) {
    let error = value.get("error");

    let message = match error {
        Some(Value::Object(obj)) => obj.get("message").and_then(Value::as_str).map(String::from),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
    .or_else(|| value.get("message").and_then(Value::as_str).map(String::from));

    let error_type = error
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .map(String::from);

    let request_id = value
        .get("request_id")
        .or_else(|| error.and_then(|e| e.get("request_id")))
        .and_then(Value::as_str)
        .map(String::from);

    (message, error_type, request_id)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(kind_for_status(400), ApiErrorKind::BadRequest);
        assert_eq!(kind_for_status(401), ApiErrorKind::Authentication);
        assert_eq!(kind_for_status(403), ApiErrorKind::PermissionDenied);
        assert_eq!(kind_for_status(404), ApiErrorKind::NotFound);
        assert_eq!(kind_for_status(429), ApiErrorKind::RateLimit);
        assert_eq!(kind_for_status(500), ApiErrorKind::InternalServer);
        assert_eq!(kind_for_status(503), ApiErrorKind::InternalServer);
        assert_eq!(kind_for_status(409), ApiErrorKind::Api);
        assert_eq!(kind_for_status(422), ApiErrorKind::Api);
    }

    #[test]
    fn test_rate_limit_preserves_message() {
        let body = r#"{"error":{"message":"Rate limit reached for gpt-4o","type":"rate_limit_exceeded","code":null}}"#;
        let err = map_error(429, body);

        assert_eq!(err.kind, ApiErrorKind::RateLimit);
        assert_eq!(err.status, 429);
        assert_eq!(err.message, "Rate limit reached for gpt-4o");
        assert_eq!(err.error_type.as_deref(), Some("rate_limit_exceeded"));
    }

    #[test]
    fn test_anthropic_error_body_with_request_id() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"},"request_id":"req_011"}"#;
        let err = map_error(401, body);

        assert_eq!(err.kind, ApiErrorKind::Authentication);
        assert_eq!(err.message, "invalid x-api-key");
        assert_eq!(err.request_id.as_deref(), Some("req_011"));
    }

    #[test]
    fn test_string_error_and_bare_message() {
        assert_eq!(map_error(403, r#"{"error":"forbidden"}"#).message, "forbidden");
        assert_eq!(map_error(404, r#"{"message":"model not found"}"#).message, "model not found");
    }

    #[test]
    fn test_unparseable_bodies() {
        let err = map_error(502, "<html>Bad Gateway</html>");
        assert_eq!(err.kind, ApiErrorKind::InternalServer);
        assert_eq!(err.message, "<html>Bad Gateway</html>");

        assert_eq!(map_error(418, "").message, "Unknown error");
        assert_eq!(map_error(418, "{}").message, "Unknown error");
        assert_eq!(map_error(418, "").kind, ApiErrorKind::Api);
    }
}
