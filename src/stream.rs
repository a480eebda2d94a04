//! Anthropic event stream over an `OpenAI` server-sent-events body.
//!
//! [`MessageStream`] parses SSE frames, feeds each chunk to a
//! [`StreamAssembler`] and yields the resulting Anthropic events. A stream that
//! hits a fatal error yields that error as its last item.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};

use crate::error::{BridgeError, Result, ToolArgumentError};
use crate::translate::anthropic_types::{MessagesResponse, StreamEvent};
use crate::translate::error_map::map_error;
use crate::translate::openai_types::ChatCompletionChunk;
use crate::translate::streaming::{StreamAssembler, Termination};

/// Malformed frames tolerated before the stream is abandoned.
pub const DEFAULT_MAX_MALFORMED_FRAMES: u32 = 3;

/// Status assumed for error objects delivered inside a 200 stream.
const IN_STREAM_ERROR_STATUS: u16 = 500;

const DONE_SENTINEL: &str = "[DONE]";

enum FrameError {
    Malformed(String),
    Transport(String),
}

type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Event, FrameError>> + Send>>;

/// A stream of Anthropic [`StreamEvent`]s for one streamed request.
pub struct MessageStream {
    frames: Option<FrameStream>,
    assembler: StreamAssembler,
    pending: VecDeque<Result<StreamEvent>>,
    malformed: u32,
    max_malformed: u32,
    strict_tool_arguments: bool,
}

impl MessageStream {
    /// Wrap a raw SSE byte stream, such as `reqwest::Response::bytes_stream()`.
    pub fn from_sse<S, B, E>(bytes: S, assembler: StreamAssembler, max_malformed: u32) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]>,
        E: fmt::Display + Send + 'static,
    {
        let frames = bytes.eventsource().map(|frame| {
            frame.map_err(|e| match e {
                EventStreamError::Transport(inner) => FrameError::Transport(inner.to_string()),
                other => FrameError::Malformed(other.to_string()),
            })
        });

        Self {
            frames: Some(Box::pin(frames)),
            assembler,
            pending: VecDeque::new(),
            malformed: 0,
            max_malformed,
            strict_tool_arguments: false,
        }
    }

    /// End the stream with [`BridgeError::ToolArgumentParse`] as soon as a
    /// tool block closes with arguments that are not valid JSON.
    #[must_use]
    pub fn strict_tool_arguments(mut self, strict: bool) -> Self {
        self.strict_tool_arguments = strict;
        self
    }

    /// Stop reading from the provider. Open blocks are closed and the
    /// closing events are still yielded, with no stop reason.
    pub fn cancel(&mut self) {
        if self.frames.take().is_some() {
            tracing::debug!("stream cancelled by caller");
            self.flush(Termination::Cancelled);
        }
    }

    /// The message reassembled from the blocks closed so far.
    pub fn message(&self) -> &MessagesResponse {
        self.assembler.message()
    }

    pub fn tool_argument_errors(&self) -> &[ToolArgumentError] {
        self.assembler.tool_argument_errors()
    }

    /// Drain the stream and return the reassembled message.
    ///
    /// # Errors
    /// The first error the stream yields.
    pub async fn final_message(mut self) -> Result<MessagesResponse> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(self.assembler.into_message())
    }

    fn handle_frame(&mut self, frame: Event) {
        let data = frame.data.trim();
        if data.is_empty() {
            return;
        }

        if data == DONE_SENTINEL {
            self.frames = None;
            self.flush(Termination::Done);
            return;
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return self.malformed(&e.to_string(), data),
        };

        if frame.event == "error" || value.get("error").is_some() {
            let err = map_error(IN_STREAM_ERROR_STATUS, data);
            tracing::warn!(message = %err.message, "provider sent an error mid-stream");
            return self.fail(err.into());
        }

        let chunk: ChatCompletionChunk = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => return self.malformed(&e.to_string(), data),
        };

        match self.assembler.consume(&chunk) {
            Ok(events) => {
                self.pending.extend(events.into_iter().map(Ok));
                self.check_tool_arguments();
            }
            Err(e) => self.fail(e),
        }
    }

    fn check_tool_arguments(&mut self) {
        if !self.strict_tool_arguments {
            return;
        }
        if let Some(err) = self.assembler.tool_argument_errors().first().cloned() {
            tracing::warn!(tool_use_id = %err.tool_use_id, "ending stream: {err}");
            self.fail(err.into());
        }
    }

    fn malformed(&mut self, reason: &str, data: &str) {
        self.malformed += 1;
        tracing::warn!(count = self.malformed, data, "skipping malformed frame: {reason}");

        if self.malformed > self.max_malformed {
            self.fail(BridgeError::stream_protocol(format!(
                "{} malformed frames received, last: {reason}",
                self.malformed
            )));
        }
    }

    fn flush(&mut self, reason: Termination) {
        let events = self.assembler.terminate(reason);
        self.pending.extend(events.into_iter().map(Ok));
        self.check_tool_arguments();
    }

    fn fail(&mut self, err: BridgeError) {
        self.frames = None;
        self.assembler.abort();
        self.pending.push_back(Err(err));
    }
}

impl Stream for MessageStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }

            let Some(frames) = this.frames.as_mut() else {
                return Poll::Ready(None);
            };

            match frames.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(frame))) => this.handle_frame(frame),
                Poll::Ready(Some(Err(FrameError::Malformed(reason)))) => {
                    this.malformed(&reason, "");
                }
                Poll::Ready(Some(Err(FrameError::Transport(reason)))) => {
                    tracing::warn!(%reason, "stream transport failed");
                    this.fail(BridgeError::transport(reason));
                }
                Poll::Ready(None) => {
                    this.frames = None;
                    this.flush(Termination::Closed);
                }
            }
        }
    }
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("open", &self.frames.is_some())
            .field("pending", &self.pending.len())
            .field("malformed", &self.malformed)
            .field("strict_tool_arguments", &self.strict_tool_arguments)
            .finish_non_exhaustive()
    }
}
