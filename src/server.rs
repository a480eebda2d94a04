use crate::client::AnthropicClient;
use crate::error::BridgeError;
use crate::logging::SharedLogger;
use crate::stream::MessageStream;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const LOG_COMPONENT: &str = "server";

#[derive(Debug, Clone)]
pub struct AppState {
    pub client: AnthropicClient,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error(LOG_COMPONENT, format!("Failed to parse request: {e}"));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    state.logger.info(
        LOG_COMPONENT,
        format!(
            "Request: model={} streaming={} messages={}",
            req.model,
            is_streaming,
            req.messages.len()
        ),
    );

    if is_streaming {
        handle_streaming(&state, &req).await
    } else {
        handle_non_streaming(&state, &req).await
    }
}

async fn handle_non_streaming(state: &AppState, req: &MessagesRequest) -> Response {
    match state.client.messages().create(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(state, &e),
    }
}

async fn handle_streaming(state: &AppState, req: &MessagesRequest) -> Response {
    let stream = match state.client.messages().stream(req).await {
        Ok(s) => s,
        Err(e) => return error_response(state, &e),
    };

    Sse::new(sse_events(stream, state.logger.clone()))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Render a [`MessageStream`] as SSE. A stream error becomes a final `error` event.
fn sse_events(
    mut stream: MessageStream,
    logger: SharedLogger,
) -> impl futures::Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut events = 0usize;

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        events += 1;
                        yield Ok(Event::default().event(event.event_name()).data(json));
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping unserializable event"),
                },
                Err(e) => {
                    logger.error(LOG_COMPONENT, format!("Stream failed after {events} events: {e}"));
                    let (_, body) = classify(&e);
                    let json = serde_json::to_string(&body).unwrap_or_default();
                    yield Ok(Event::default().event("error").data(json));
                    break;
                }
            }
        }

        logger.info(LOG_COMPONENT, format!("Stream completed: {events} events"));
    }
}

fn error_response(state: &AppState, err: &BridgeError) -> Response {
    let (status, body) = classify(err);
    state
        .logger
        .error(LOG_COMPONENT, format!("{} {}", status.as_u16(), err));
    (status, Json(body)).into_response()
}

/// HTTP status and Anthropic error body for a failed request.
fn classify(err: &BridgeError) -> (StatusCode, ErrorResponse) {
    match err {
        BridgeError::Validation { message } => {
            (StatusCode::BAD_REQUEST, ErrorResponse::invalid_request(message.clone()))
        }
        BridgeError::Api(api) => (
            StatusCode::from_u16(api.status).unwrap_or(StatusCode::BAD_GATEWAY),
            ErrorResponse::new(api.kind.anthropic_type(), api.message.clone()),
        ),
        BridgeError::Transport { .. }
        | BridgeError::Http(_)
        | BridgeError::Translation { .. }
        | BridgeError::StreamProtocol { .. }
        | BridgeError::ToolArgumentParse(_) => {
            (StatusCode::BAD_GATEWAY, ErrorResponse::api_error(err.to_string()))
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::api_error(err.to_string()),
        ),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "upstream": state.client.base_url(),
    }))
}
