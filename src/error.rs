//! Error types for the bridge.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// The inbound request is incomplete or malformed. Raised before any
    /// translation or network activity.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Streamed data violated the content-block ordering rules. Fatal for the stream.
    #[error("Stream protocol error: {message}")]
    StreamProtocol { message: String },

    /// Tool-call arguments were not valid JSON. Only raised in strict mode;
    /// otherwise the error is reported alongside the message.
    #[error(transparent)]
    ToolArgumentParse(#[from] ToolArgumentError),

    /// Upstream service answered with an error status.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn stream_protocol(msg: impl Into<String>) -> Self {
        Self::StreamProtocol {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// The upstream error, when this error came from the provider.
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Client-facing classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadRequest,
    Authentication,
    PermissionDenied,
    NotFound,
    RateLimit,
    InternalServer,
    /// Any status without a dedicated kind.
    Api,
}

impl ApiErrorKind {
    /// The `error.type` string used in Anthropic error bodies.
    pub fn anthropic_type(self) -> &'static str {
        match self {
            Self::BadRequest => "invalid_request_error",
            Self::Authentication => "authentication_error",
            Self::PermissionDenied => "permission_error",
            Self::NotFound => "not_found_error",
            Self::RateLimit => "rate_limit_error",
            Self::InternalServer | Self::Api => "api_error",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadRequest => "BadRequestError",
            Self::Authentication => "AuthenticationError",
            Self::PermissionDenied => "PermissionError",
            Self::NotFound => "NotFoundError",
            Self::RateLimit => "RateLimitError",
            Self::InternalServer => "InternalServerError",
            Self::Api => "APIError",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (status {status}): {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: u16,
    pub message: String,
    /// Upstream `error.type`, when the body carried one.
    pub error_type: Option<String>,
    pub request_id: Option<String>,
}

impl ApiError {
    /// Fill in the request id from a response header unless the body already supplied one.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if self.request_id.is_none() {
            self.request_id = request_id;
        }
        self
    }
}

/// Tool-call arguments that did not parse as JSON. Non-fatal by default: the
/// tool block is kept with an empty object as input and the raw text is
/// retained here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("arguments for tool `{name}` ({tool_use_id}) are not valid JSON: {reason}")]
pub struct ToolArgumentError {
    pub tool_use_id: String,
    pub name: String,
    pub raw_arguments: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_names() {
        assert_eq!(ApiErrorKind::RateLimit.to_string(), "RateLimitError");
        assert_eq!(ApiErrorKind::PermissionDenied.to_string(), "PermissionError");
        assert_eq!(ApiErrorKind::Api.to_string(), "APIError");
    }

    #[test]
    fn test_request_id_from_body_wins() {
        let err = ApiError {
            kind: ApiErrorKind::NotFound,
            status: 404,
            message: "no such model".to_string(),
            error_type: None,
            request_id: Some("req_body".to_string()),
        };

        let err = err.with_request_id(Some("req_header".to_string()));
        assert_eq!(err.request_id.as_deref(), Some("req_body"));
    }
}
