//! Anthropic-shaped client for `OpenAI`-compatible chat services.
//!
//! `client.messages().create(&request)` sends an Anthropic Messages request to
//! `{base_url}/chat/completions` and hands back an Anthropic response;
//! `stream(&request)` does the same for streamed output.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{redact_headers, LogLevel, SharedLogger};
use crate::stream::{MessageStream, DEFAULT_MAX_MALFORMED_FRAMES};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse};
use crate::translate::error_map::map_error;
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, StreamOptions,
};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic_with_diagnostics;
use crate::translate::streaming::StreamAssembler;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
const API_KEY_ENV: &str = "OPENAI_API_KEY";
const REQUEST_ID_HEADER: &str = "x-request-id";
const LOG_COMPONENT: &str = "client";

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    default_headers: HeaderMap,
    logger: Option<SharedLogger>,
    max_malformed_frames: u32,
    max_retries: u32,
    strict_tool_arguments: bool,
}

impl AnthropicClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Client for the provider a [`BridgeConfig`] describes. The API key is read
    /// from the configured environment variable.
    pub fn from_config(config: &BridgeConfig, logger: Option<SharedLogger>) -> Result<Self> {
        let mut builder = Self::builder()
            .api_key(config.resolve_api_key()?)
            .base_url(config.effective_base_url()?)
            .timeout(config.client.timeout())
            .max_retries(config.client.max_retries)
            .strict_tool_arguments(config.client.strict_tool_arguments)
            .max_malformed_frames(config.stream.max_malformed_frames);

        if let Some(connect_timeout) = config.client.connect_timeout() {
            builder = builder.connect_timeout(connect_timeout);
        }
        for (name, value) in &config.client.headers {
            builder = builder.default_header(name, value);
        }
        if let Some(logger) = logger {
            builder = builder.logger(logger);
        }

        builder.build()
    }

    pub fn messages(&self) -> Messages<'_> {
        Messages { client: self }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let url = self.completions_url();
        let streaming = body.stream == Some(true);

        self.record(
            LogLevel::Info,
            format!("POST {url} model={} stream={streaming}", body.model),
            &json!({
                "headers": redact_headers(
                    self.default_headers
                        .iter()
                        .filter_map(|(k, v)| Some((k.as_str(), v.to_str().ok()?)))
                        .chain([("authorization", self.api_key.as_str())])
                ),
                "body": serde_json::to_value(body).unwrap_or_default(),
            }),
        );

        // Only connection failures are retried: nothing reached the provider.
        let attempts = AtomicU32::new(0);
        let response = backoff::future::retry(connect_backoff(), || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);

            let mut request = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .headers(self.default_headers.clone())
                .json(body);
            // Streams may legitimately outlive the request timeout.
            if !streaming {
                request = request.timeout(self.timeout);
            }

            request.send().await.map_err(|e| {
                if e.is_connect() && attempt < self.max_retries {
                    tracing::debug!(attempt = attempt + 1, %url, "connect failed, retrying: {e}");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::Permanent(e)
                }
            })
        })
        .await
        .map_err(|e| {
            let attempts = attempts.load(Ordering::Relaxed);
            if e.is_timeout() {
                BridgeError::transport(format!("Request timed out after {:?}", self.timeout))
            } else if attempts > 1 {
                BridgeError::transport(format!("Request failed after {attempts} attempts: {e}"))
            } else {
                BridgeError::transport(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.text().await.unwrap_or_default();
        let err = map_error(status.as_u16(), &body).with_request_id(request_id);

        tracing::warn!(status = status.as_u16(), kind = %err.kind, "upstream error: {}", err.message);
        self.record(
            LogLevel::Warn,
            format!("Upstream error status={}: {}", err.status, err.message),
            &json!({ "status": err.status, "request_id": err.request_id }),
        );

        Err(err.into())
    }

    fn record(&self, level: LogLevel, message: String, context: &serde_json::Value) {
        if let Some(ref logger) = self.logger {
            logger.log_with_context(level, LOG_COMPONENT, message, context);
        }
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_malformed_frames", &self.max_malformed_frames)
            .field("max_retries", &self.max_retries)
            .field("strict_tool_arguments", &self.strict_tool_arguments)
            .finish_non_exhaustive()
    }
}

/// The Messages resource.
#[derive(Debug, Clone, Copy)]
pub struct Messages<'a> {
    client: &'a AnthropicClient,
}

impl Messages<'_> {
    /// Send a request and wait for the whole response. `request.stream` is ignored.
    ///
    /// # Errors
    /// - [`BridgeError::Validation`] for an incomplete request; nothing is sent.
    /// - [`BridgeError::Api`] when the provider answers with an error status.
    /// - [`BridgeError::Transport`] / [`BridgeError::Http`] for network failures.
    /// - [`BridgeError::Translation`] when the provider's body is not a chat completion.
    /// - [`BridgeError::ToolArgumentParse`] for unparseable tool arguments, only
    ///   with [`ClientBuilder::strict_tool_arguments`].
    pub async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let mut body = anthropic_to_openai(request)?;
        body.stream = None;

        let response = self.client.send(&body).await?;
        let text = response.text().await?;

        let completion: ChatCompletionResponse = serde_json::from_str(&text).map_err(|e| {
            BridgeError::translation(format!(
                "Failed to parse provider response: {e}. Body: {}",
                text.chars().take(300).collect::<String>()
            ))
        })?;

        let (mut message, diagnostics) = openai_to_anthropic_with_diagnostics(&completion);
        if message.model.is_empty() {
            message.model.clone_from(&request.model);
        }
        for diag in &diagnostics {
            tracing::warn!(tool_use_id = %diag.tool_use_id, raw = %diag.raw_arguments, "{diag}");
        }
        if self.client.strict_tool_arguments {
            if let Some(diag) = diagnostics.first() {
                return Err(diag.clone().into());
            }
        }

        self.client.record(
            LogLevel::Info,
            format!(
                "Completed {}: in={} out={} tokens",
                message.id, message.usage.input_tokens, message.usage.output_tokens
            ),
            &json!({
                "stop_reason": message.stop_reason,
                "blocks": message.content.len(),
                "tool_argument_errors": diagnostics.len(),
            }),
        );

        Ok(message)
    }

    /// Send a request and stream the response as Anthropic events. `request.stream` is ignored.
    ///
    /// # Errors
    /// Same as [`Messages::create`] for everything up to the response headers;
    /// failures after that arrive as the stream's last item.
    pub async fn stream(&self, request: &MessagesRequest) -> Result<MessageStream> {
        let mut body = anthropic_to_openai(request)?;
        body.stream = Some(true);
        body.stream_options = Some(StreamOptions {
            include_usage: true,
        });

        let response = self.client.send(&body).await?;

        Ok(MessageStream::from_sse(
            response.bytes_stream(),
            StreamAssembler::new(&request.model),
            self.client.max_malformed_frames,
        )
        .strict_tool_arguments(self.client.strict_tool_arguments))
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    default_headers: Vec<(String, String)>,
    http_client: Option<reqwest::Client>,
    logger: Option<SharedLogger>,
    max_malformed_frames: Option<u32>,
    max_retries: Option<u32>,
    strict_tool_arguments: bool,
}

impl ClientBuilder {
    /// Defaults to the `OPENAI_API_KEY` environment variable.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Whole-request timeout for non-streaming calls.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ignored when a custom `http_client` is supplied.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn max_malformed_frames(mut self, max: u32) -> Self {
        self.max_malformed_frames = Some(max);
        self
    }

    /// Retries after a failed connection attempt, with exponential backoff.
    /// Defaults to 2; 0 disables retrying.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Return [`BridgeError::ToolArgumentParse`] instead of an empty tool
    /// input when the provider's tool arguments are not valid JSON.
    #[must_use]
    pub fn strict_tool_arguments(mut self, strict: bool) -> Self {
        self.strict_tool_arguments = strict;
        self
    }

    pub fn build(self) -> Result<AnthropicClient> {
        let api_key = match self.api_key {
            Some(key) => key,
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                BridgeError::config(format!("No API key given and {API_KEY_ENV} is not set"))
            })?,
        };

        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BridgeError::config(format!("Invalid header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                BridgeError::config(format!("Invalid value for header '{name}': {e}"))
            })?;
            default_headers.insert(header_name, header_value);
        }

        let http = match self.http_client {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(connect_timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(connect_timeout);
                }
                builder.build()?
            }
        };

        let base_url = self
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(AnthropicClient {
            http,
            api_key,
            base_url,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            default_headers,
            logger: self.logger,
            max_malformed_frames: self
                .max_malformed_frames
                .unwrap_or(DEFAULT_MAX_MALFORMED_FRAMES),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            strict_tool_arguments: self.strict_tool_arguments,
        })
    }
}

fn connect_backoff() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: Some(Duration::from_secs(30)),
        randomization_factor: 0.5,
        multiplier: 2.0,
        ..Default::default()
    }
}
