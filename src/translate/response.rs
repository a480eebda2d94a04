use super::anthropic_types::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use super::openai_types::{ChatCompletionResponse, ChatUsage, FinishReason};
use crate::error::{Result, ToolArgumentError};

/// Translate an `OpenAI` Chat Completion response into an Anthropic Messages response.
///
/// Tool calls whose arguments are not valid JSON keep an empty object as input;
/// each occurrence is logged. Use [`openai_to_anthropic_with_diagnostics`] to get
/// the raw arguments back.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse) -> MessagesResponse {
    let (message, diagnostics) = openai_to_anthropic_with_diagnostics(resp);
    for diag in &diagnostics {
        tracing::warn!(
            tool_use_id = %diag.tool_use_id,
            raw = %diag.raw_arguments,
            "{diag}"
        );
    }
    message
}

/// Same as [`openai_to_anthropic`], also returning every tool call whose
/// arguments failed to parse.
pub fn openai_to_anthropic_with_diagnostics(
    resp: &ChatCompletionResponse,
) -> (MessagesResponse, Vec<ToolArgumentError>) {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();
    let mut diagnostics = Vec::new();

    if let Some(c) = choice {
        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                let input = match parse_tool_arguments(&tc.function.arguments) {
                    Ok(input) => input,
                    Err(reason) => {
                        diagnostics.push(ToolArgumentError {
                            tool_use_id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            raw_arguments: tc.function.arguments.clone(),
                            reason,
                        });
                        empty_input()
                    }
                };

                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_ref()));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, map_usage);

    let id = if resp.id.is_empty() {
        new_message_id()
    } else {
        resp.id.clone()
    };

    let message = MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resp.model.clone(),
        stop_reason,
        stop_sequence: None,
        usage,
    };

    (message, diagnostics)
}

/// Same as [`openai_to_anthropic`], but a tool call with unparseable
/// arguments fails the whole translation.
///
/// # Errors
/// [`BridgeError::ToolArgumentParse`](crate::error::BridgeError::ToolArgumentParse)
/// for the first such tool call.
pub fn openai_to_anthropic_strict(resp: &ChatCompletionResponse) -> Result<MessagesResponse> {
    let (message, diagnostics) = openai_to_anthropic_with_diagnostics(resp);
    match diagnostics.into_iter().next() {
        Some(err) => Err(err.into()),
        None => Ok(message),
    }
}

/// Map `OpenAI` `finish_reason` to Anthropic `stop_reason`.
///
/// | finish_reason    | stop_reason  |
/// |------------------|--------------|
/// | `stop`           | `end_turn`   |
/// | `length`         | `max_tokens` |
/// | `tool_calls`     | `tool_use`   |
/// | `function_call`  | `tool_use`   |
/// | `content_filter` | `end_turn`   |
/// | anything else    | `end_turn`   |
/// | absent           | absent       |
pub fn map_finish_reason(reason: Option<&FinishReason>) -> Option<StopReason> {
    let reason = reason?;
    Some(match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls | FinishReason::FunctionCall => StopReason::ToolUse,
        FinishReason::ContentFilter | FinishReason::Other => StopReason::EndTurn,
    })
}

pub fn map_usage(usage: &ChatUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    }
}

/// Parse a complete tool-call argument string. Empty arguments mean "no input".
pub(crate) fn parse_tool_arguments(raw: &str) -> std::result::Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(empty_input());
    }
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

pub(crate) fn empty_input() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

pub(crate) fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;
    use serde_json::json;

    fn make_response(
        content: Option<String>,
        tool_calls: Option<Vec<ChatToolCall>>,
        finish_reason: Option<FinishReason>,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: Some("assistant".to_string()),
                    content,
                    tool_calls,
                },
                finish_reason,
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ChatToolCall {
        ChatToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(Some("Hello!".to_string()), None, Some(FinishReason::Stop));
        let result = openai_to_anthropic(&resp);

        assert_eq!(result.id, "chatcmpl-abc123");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "Hello!".to_string()
            }]
        );
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_tool_call_response() {
        let resp = make_response(
            Some("Let me check.".to_string()),
            Some(vec![tool_call("call_abc", "get_weather", "{\"city\":\"London\"}")]),
            Some(FinishReason::ToolCalls),
        );

        let result = openai_to_anthropic(&resp);

        assert_eq!(result.content.len(), 2);
        assert_eq!(result.stop_reason, Some(StopReason::ToolUse));

        if let ResponseContentBlock::ToolUse { id, name, input } = &result.content[1] {
            assert_eq!(id, "call_abc");
            assert_eq!(name, "get_weather");
            assert_eq!(input["city"], "London");
        } else {
            panic!("Expected tool_use content block");
        }
    }

    #[test]
    fn test_empty_text_is_not_a_block() {
        let resp = make_response(
            Some(String::new()),
            Some(vec![tool_call("call_1", "ping", "")]),
            Some(FinishReason::ToolCalls),
        );

        let result = openai_to_anthropic(&resp);
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "ping".to_string(),
                input: json!({}),
            }]
        );
    }

    #[test]
    fn test_bad_tool_arguments_degrade_to_empty_input() {
        let resp = make_response(
            None,
            Some(vec![tool_call("call_1", "search", "{\"q\": \"rust")]),
            Some(FinishReason::ToolCalls),
        );

        let (result, diagnostics) = openai_to_anthropic_with_diagnostics(&resp);

        assert_eq!(result.content.len(), 1);
        if let ResponseContentBlock::ToolUse { input, .. } = &result.content[0] {
            assert_eq!(input, &json!({}));
        } else {
            panic!("Expected tool_use content block");
        }
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].tool_use_id, "call_1");
        assert_eq!(diagnostics[0].raw_arguments, "{\"q\": \"rust");
    }

    #[test]
    fn test_strict_translation_rejects_bad_arguments() {
        let resp = make_response(
            None,
            Some(vec![
                tool_call("call_1", "search", "{\"q\": \"rust\"}"),
                tool_call("call_2", "fetch", "{\"url\": "),
            ]),
            Some(FinishReason::ToolCalls),
        );

        match openai_to_anthropic_strict(&resp) {
            Err(crate::error::BridgeError::ToolArgumentParse(err)) => {
                assert_eq!(err.tool_use_id, "call_2");
                assert_eq!(err.name, "fetch");
                assert_eq!(err.raw_arguments, "{\"url\": ");
            }
            other => panic!("Expected tool argument error, got {other:?}"),
        }

        let ok = make_response(
            None,
            Some(vec![tool_call("call_1", "search", "{\"q\": \"rust\"}")]),
            Some(FinishReason::ToolCalls),
        );
        assert_eq!(openai_to_anthropic_strict(&ok).unwrap().content.len(), 1);
    }

    #[test]
    fn test_missing_finish_reason_and_usage() {
        let mut resp = make_response(Some("partial".to_string()), None, None);
        resp.usage = None;
        resp.id = String::new();

        let result = openai_to_anthropic(&resp);
        assert_eq!(result.stop_reason, None);
        assert_eq!(result.usage, Usage::default());
        assert!(result.id.starts_with("msg_"));
    }

    #[test]
    fn test_no_choices_yields_empty_message() {
        let mut resp = make_response(None, None, None);
        resp.choices.clear();

        let result = openai_to_anthropic(&resp);
        assert!(result.content.is_empty());
        assert_eq!(result.stop_reason, None);
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(
            map_finish_reason(Some(&FinishReason::Stop)),
            Some(StopReason::EndTurn)
        );
        assert_eq!(
            map_finish_reason(Some(&FinishReason::Length)),
            Some(StopReason::MaxTokens)
        );
        assert_eq!(
            map_finish_reason(Some(&FinishReason::ToolCalls)),
            Some(StopReason::ToolUse)
        );
        assert_eq!(
            map_finish_reason(Some(&FinishReason::ContentFilter)),
            Some(StopReason::EndTurn)
        );
        assert_eq!(
            map_finish_reason(Some(&FinishReason::Other)),
            Some(StopReason::EndTurn)
        );
        assert_eq!(map_finish_reason(None), None);
    }
}
