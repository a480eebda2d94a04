//! State machine for reassembling `OpenAI` streaming chunks into Anthropic stream events.
//!
//! The [`StreamAssembler`] consumes `ChatCompletionChunk`s one at a time, in wire
//! order, and emits the block-indexed Anthropic events (`message_start`,
//! `content_block_start`, `content_block_delta`, ...). One assembler serves
//! exactly one stream.
//!
//! Ordering guarantees for every stream it produces:
//! - `message_start` is the first event and `message_stop` the last, once each.
//! - Block indices start at 0 and are handed out in order of first appearance.
//! - Per index: one start, then its deltas, then one stop.
//!
//! At most one content block is open at a time. A new block (text after a tool
//! call, or a second tool call) closes the previous one first.

use std::collections::{BTreeMap, HashMap};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StopReason,
    StreamEvent,
};
use super::openai_types::{ChatCompletionChunk, ChatUsage, ChunkToolCall};
use super::response::{empty_input, map_finish_reason, map_usage, new_message_id, parse_tool_arguments};
use crate::error::{BridgeError, Result, ToolArgumentError};

/// Why a stream is being closed without a `finish_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The provider sent `[DONE]`.
    Done,
    /// The transport ended before the provider finished.
    Closed,
    /// The caller gave up on the stream (cancel or deadline).
    Cancelled,
}

#[derive(Debug)]
enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

#[derive(Debug)]
struct OpenBlock {
    kind: BlockKind,
    accumulated: String,
}

/// Per-stream bookkeeping, alive from the first chunk until `message_stop`.
#[derive(Debug, Default)]
struct StreamState {
    open_blocks: BTreeMap<usize, OpenBlock>,
    next_index: usize,
    /// Wire tool-call index -> content block index and the id the provider sent.
    tool_blocks: HashMap<u32, (usize, Option<String>)>,
    highest_tool_index: Option<u32>,
    usage_so_far: Option<ChatUsage>,
}

#[derive(Debug)]
enum Phase {
    Pending,
    Streaming(StreamState),
    Finished,
}

/// The message as reassembled from closed blocks.
#[derive(Debug)]
struct Snapshot {
    message: MessagesResponse,
    tool_argument_errors: Vec<ToolArgumentError>,
}

/// Translates one `OpenAI` chunk stream into Anthropic stream events.
///
/// Usage:
///   let mut assembler = StreamAssembler::new("gpt-4o");
///   for chunk in openai_chunks {
///       for event in assembler.consume(&chunk)? {
///           // forward event
///       }
///   }
///   let trailing = assembler.terminate(Termination::Done);
#[derive(Debug)]
pub struct StreamAssembler {
    model: String,
    phase: Phase,
    snapshot: Snapshot,
}

impl StreamAssembler {
    /// `model` names the message when the provider's chunks do not.
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            phase: Phase::Pending,
            snapshot: Snapshot {
                message: MessagesResponse::skeleton(String::new(), model),
                tool_argument_errors: Vec::new(),
            },
        }
    }

    /// Process a single chunk, returning zero or more events.
    ///
    /// # Errors
    /// Returns [`BridgeError::StreamProtocol`] when the chunk breaks block ordering:
    /// argument fragments for a tool call that was never started, a tool-call index
    /// lower than one already seen, or fragments for a block that was already closed.
    /// The stream is finished afterwards; later calls yield nothing.
    pub fn consume(&mut self, chunk: &ChatCompletionChunk) -> Result<Vec<StreamEvent>> {
        let mut events = Vec::new();

        if matches!(self.phase, Phase::Pending) {
            self.start(Some(chunk), &mut events);
        }

        let Phase::Streaming(ref mut state) = self.phase else {
            // With `include_usage` the provider reports usage in a trailing
            // chunk after the finish reason.
            if let Some(ref usage) = chunk.usage {
                tracing::trace!(chunk_id = %chunk.id, "usage after message_stop");
                self.snapshot.message.usage = map_usage(usage);
            } else {
                tracing::trace!(chunk_id = %chunk.id, "chunk after message_stop ignored");
            }
            return Ok(events);
        };

        match state.apply(chunk, &mut self.snapshot, &mut events) {
            Ok(Some(stop_reason)) => {
                state.finish(Some(stop_reason), &mut self.snapshot, &mut events);
                self.phase = Phase::Finished;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "aborting stream");
                self.phase = Phase::Finished;
                return Err(e);
            }
        }

        Ok(events)
    }

    /// Flush a stream that ended without a `finish_reason`: close open blocks,
    /// then `message_delta` and `message_stop`. Emits `message_start` first if the
    /// stream never started. Yields nothing once the stream has finished.
    pub fn terminate(&mut self, reason: Termination) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if matches!(self.phase, Phase::Finished) {
            return events;
        }
        if matches!(self.phase, Phase::Pending) {
            self.start(None, &mut events);
        }

        let stop_reason = match reason {
            Termination::Done => Some(StopReason::EndTurn),
            Termination::Closed | Termination::Cancelled => None,
        };

        if let Phase::Streaming(ref mut state) = self.phase {
            tracing::debug!(?reason, open_blocks = state.open_blocks.len(), "terminating stream");
            state.finish(stop_reason, &mut self.snapshot, &mut events);
        }
        self.phase = Phase::Finished;

        events
    }

    /// Stop translating without emitting anything further, e.g. after a transport failure.
    pub fn abort(&mut self) {
        self.phase = Phase::Finished;
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.phase, Phase::Pending)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// The message reassembled from every block closed so far.
    pub fn message(&self) -> &MessagesResponse {
        &self.snapshot.message
    }

    pub fn into_message(self) -> MessagesResponse {
        self.snapshot.message
    }

    /// Tool blocks whose accumulated arguments did not parse as JSON when they closed.
    pub fn tool_argument_errors(&self) -> &[ToolArgumentError] {
        &self.snapshot.tool_argument_errors
    }

    fn start(&mut self, chunk: Option<&ChatCompletionChunk>, events: &mut Vec<StreamEvent>) {
        let id = chunk
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
            .map_or_else(new_message_id, String::from);
        let model = chunk
            .map(|c| c.model.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or(self.model.as_str())
            .to_string();

        let skeleton = MessagesResponse::skeleton(id, model);
        events.push(StreamEvent::MessageStart {
            message: skeleton.clone(),
        });
        self.snapshot.message = skeleton;
        self.phase = Phase::Streaming(StreamState::default());
    }
}

impl StreamState {
    /// Apply one chunk. Returns the stop reason when the chunk finishes the message.
    fn apply(
        &mut self,
        chunk: &ChatCompletionChunk,
        snapshot: &mut Snapshot,
        events: &mut Vec<StreamEvent>,
    ) -> Result<Option<StopReason>> {
        if let Some(ref usage) = chunk.usage {
            self.usage_so_far = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.first() else {
            return Ok(None);
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            let index = match self.open_text_block() {
                Some(index) => index,
                None => {
                    self.close_all(snapshot, events);
                    self.open_block(BlockKind::Text, events)
                }
            };
            self.append(index, text);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for call in tool_calls {
                self.apply_tool_call(call, snapshot, events)?;
            }
        }

        Ok(choice
            .finish_reason
            .as_ref()
            .and_then(|reason| map_finish_reason(Some(reason))))
    }

    fn apply_tool_call(
        &mut self,
        call: &ChunkToolCall,
        snapshot: &mut Snapshot,
        events: &mut Vec<StreamEvent>,
    ) -> Result<()> {
        let call_id = call.id.as_deref().filter(|id| !id.is_empty());

        // A different id on a known wire index starts a new call.
        let continued = self
            .tool_blocks
            .get(&call.index)
            .filter(|(_, wire_id)| match (call_id, wire_id.as_deref()) {
                (Some(new), Some(open)) => new == open,
                _ => true,
            })
            .map(|(index, _)| *index);

        let index = if let Some(index) = continued {
            if !self.open_blocks.contains_key(&index) {
                return Err(BridgeError::stream_protocol(format!(
                    "tool call {} continued after content block {index} was closed",
                    call.index
                )));
            }
            index
        } else {
            if let Some(highest) = self.highest_tool_index {
                if call.index < highest {
                    return Err(BridgeError::stream_protocol(format!(
                        "tool call {} appeared after tool call {highest}",
                        call.index
                    )));
                }
            }

            let name = call
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .filter(|name| !name.is_empty());
            if call_id.is_none() && name.is_none() {
                return Err(BridgeError::stream_protocol(format!(
                    "tool call {} sent arguments before it was started",
                    call.index
                )));
            }
            if self.tool_blocks.contains_key(&call.index) {
                tracing::debug!(wire_index = call.index, id = ?call_id, "wire index reused by a new tool call");
            }

            self.close_all(snapshot, events);
            let kind = BlockKind::ToolUse {
                id: call_id.map_or_else(new_tool_use_id, String::from),
                name: name.unwrap_or_default(),
            };
            let index = self.open_block(kind, events);
            self.tool_blocks
                .insert(call.index, (index, call_id.map(String::from)));
            self.highest_tool_index = Some(call.index);
            index
        };

        let fragment = call
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default();
        if !fragment.is_empty() {
            self.append(index, fragment);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: fragment.to_string(),
                },
            });
        }

        Ok(())
    }

    fn open_text_block(&self) -> Option<usize> {
        self.open_blocks
            .iter()
            .find(|(_, block)| matches!(block.kind, BlockKind::Text))
            .map(|(index, _)| *index)
    }

    fn open_block(&mut self, kind: BlockKind, events: &mut Vec<StreamEvent>) -> usize {
        let index = self.next_index;
        self.next_index += 1;

        let content_block = match kind {
            BlockKind::Text => ResponseContentBlock::Text {
                text: String::new(),
            },
            BlockKind::ToolUse { ref id, ref name } => ResponseContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: empty_input(),
            },
        };
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });

        self.open_blocks.insert(
            index,
            OpenBlock {
                kind,
                accumulated: String::new(),
            },
        );
        index
    }

    fn append(&mut self, index: usize, fragment: &str) {
        if let Some(block) = self.open_blocks.get_mut(&index) {
            block.accumulated.push_str(fragment);
        }
    }

    /// Close every open block in ascending index order.
    fn close_all(&mut self, snapshot: &mut Snapshot, events: &mut Vec<StreamEvent>) {
        for (index, block) in std::mem::take(&mut self.open_blocks) {
            events.push(StreamEvent::ContentBlockStop { index });
            snapshot.push_block(index, block);
        }
    }

    fn finish(
        &mut self,
        stop_reason: Option<StopReason>,
        snapshot: &mut Snapshot,
        events: &mut Vec<StreamEvent>,
    ) {
        self.close_all(snapshot, events);

        let usage = self.usage_so_far.as_ref();
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: usage.map(|u| u.prompt_tokens),
                output_tokens: usage.map_or(0, |u| u.completion_tokens),
            },
        });
        events.push(StreamEvent::MessageStop);

        snapshot.message.stop_reason = stop_reason;
        if let Some(usage) = usage {
            snapshot.message.usage = map_usage(usage);
        }
    }
}

impl Snapshot {
    fn push_block(&mut self, index: usize, block: OpenBlock) {
        let content = match block.kind {
            BlockKind::Text => ResponseContentBlock::Text {
                text: block.accumulated,
            },
            BlockKind::ToolUse { id, name } => {
                let input = match parse_tool_arguments(&block.accumulated) {
                    Ok(input) => input,
                    Err(reason) => {
                        tracing::warn!(
                            index,
                            tool_use_id = %id,
                            raw = %block.accumulated,
                            "tool arguments are not valid JSON: {reason}"
                        );
                        self.tool_argument_errors.push(ToolArgumentError {
                            tool_use_id: id.clone(),
                            name: name.clone(),
                            raw_arguments: block.accumulated,
                            reason,
                        });
                        empty_input()
                    }
                };
                ResponseContentBlock::ToolUse { id, name, input }
            }
        };
        self.message.content.push(content);
    }
}

fn new_tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}
