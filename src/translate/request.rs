//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles system prompts, multi-part content (text, images), tool use, tool results,
//! and tool choice mapping. A single Anthropic message can expand into multiple `OpenAI`
//! messages (e.g. a user message with `tool_result` blocks becomes separate `tool`-role messages).

use super::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, Tool, ToolChoice,
    ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatRole, ChatTool,
    ChatToolCall, ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction,
    ChatToolChoiceSpecific, ContentPart, ImageUrlDetail,
};
use crate::error::{BridgeError, Result};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
///
/// Pure function. The model identifier passes through unchanged.
///
/// # Errors
/// Returns [`BridgeError::Validation`] when `model`, `messages` or `max_tokens` is
/// missing, or when a content block appears in a message whose role cannot carry it.
pub fn anthropic_to_openai(req: &MessagesRequest) -> Result<ChatCompletionRequest> {
    validate(req)?;

    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text(ChatRole::System, text));
        }
    }

    for (position, msg) in req.messages.iter().enumerate() {
        let mut translated = translate_message(msg).map_err(|e| match e {
            BridgeError::Validation { message } => {
                BridgeError::validation(format!("messages[{position}]: {message}"))
            }
            other => other,
        })?;
        messages.append(&mut translated);
    }

    let tools = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(translate_tool).collect());

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    let out = ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options: None,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
    };

    tracing::debug!(
        model = %out.model,
        messages = out.messages.len(),
        tools = out.tools.as_ref().map_or(0, Vec::len),
        "translated request"
    );

    Ok(out)
}

fn validate(req: &MessagesRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(BridgeError::validation("`model` is required"));
    }
    if req.messages.is_empty() {
        return Err(BridgeError::validation(
            "`messages` is required and must not be empty",
        ));
    }
    if req.max_tokens.is_none() {
        return Err(BridgeError::validation("`max_tokens` is required"));
    }
    Ok(())
}

/// A single Anthropic message can expand to multiple `OpenAI` messages.
fn translate_message(msg: &Message) -> Result<Vec<ChatMessage>> {
    let blocks = match msg.content {
        MessageContent::Text(_) if msg.role == Role::Tool => {
            return Err(BridgeError::validation(TOOL_MESSAGE_CONTENT));
        }
        MessageContent::Text(ref text) => {
            return Ok(vec![ChatMessage::text(chat_role(msg.role), text.clone())]);
        }
        MessageContent::Blocks(ref blocks) => blocks,
    };

    match msg.role {
        Role::Assistant => translate_assistant_message(blocks),
        Role::User => translate_user_message(blocks),
        Role::Tool => translate_tool_message(blocks),
        Role::System => translate_system_message(blocks),
    }
}

const TOOL_MESSAGE_CONTENT: &str = "tool messages may only contain tool_result blocks";

fn chat_role(role: Role) -> ChatRole {
    match role {
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
        Role::System => ChatRole::System,
        Role::Tool => ChatRole::Tool,
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let data_uri = format!("data:{};base64,{}", source.media_type, source.data);
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: data_uri,
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Flush text gathered so far so ordering within the message survives
                if !content_parts.is_empty() {
                    messages.push(ChatMessage {
                        role: ChatRole::User,
                        content: Some(collapse_content_parts(&content_parts)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                    content_parts.clear();
                }

                messages.push(tool_result_message(tool_use_id, content.as_ref(), *is_error));
            }
            ContentBlock::ToolUse { name, .. } => {
                return Err(BridgeError::validation(format!(
                    "tool_use block `{name}` is only allowed in assistant messages"
                )));
            }
        }
    }

    if !content_parts.is_empty() {
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: Some(collapse_content_parts(&content_parts)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    if messages.is_empty() {
        messages.push(ChatMessage::text(ChatRole::User, String::new()));
    }

    Ok(messages)
}

/// Every `tool`-role message must answer a call, so only `tool_result` blocks fit.
fn translate_tool_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    if blocks.is_empty() {
        return Err(BridgeError::validation(TOOL_MESSAGE_CONTENT));
    }

    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Ok(tool_result_message(tool_use_id, content.as_ref(), *is_error)),
            _ => Err(BridgeError::validation(TOOL_MESSAGE_CONTENT)),
        })
        .collect()
}

fn tool_result_message(
    tool_use_id: &str,
    content: Option<&ToolResultContent>,
    is_error: Option<bool>,
) -> ChatMessage {
    ChatMessage {
        role: ChatRole::Tool,
        content: Some(ChatContent::Text(tool_result_to_string(content, is_error))),
        tool_calls: None,
        tool_call_id: Some(tool_use_id.to_string()),
    }
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)?,
                    },
                });
            }
            ContentBlock::Image { .. } => {
                return Err(BridgeError::validation(
                    "image blocks are not allowed in assistant messages",
                ));
            }
            ContentBlock::ToolResult { tool_use_id, .. } => {
                return Err(BridgeError::validation(format!(
                    "tool_result block for `{tool_use_id}` is not allowed in assistant messages"
                )));
            }
        }
    }

    // OpenAI wants a content field next to tool_calls; empty string when there is no text
    let content = if text_parts.is_empty() && tool_calls.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text_parts.join("\n")))
    };

    let tool_calls_opt = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };

    Ok(vec![ChatMessage {
        role: ChatRole::Assistant,
        content,
        tool_calls: tool_calls_opt,
        tool_call_id: None,
    }])
}

fn translate_system_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    let mut text_parts: Vec<&str> = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::Image { .. }
            | ContentBlock::ToolUse { .. }
            | ContentBlock::ToolResult { .. } => {
                return Err(BridgeError::validation(
                    "system messages may only contain text blocks",
                ));
            }
        }
    }
    Ok(vec![ChatMessage::text(ChatRole::System, text_parts.join("\n"))])
}

/// Consecutive text parts become one plain string; anything with an image stays multi-part.
fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    let mut texts = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            ContentPart::Text { text } => texts.push(text.as_str()),
            ContentPart::ImageUrl { .. } => return ChatContent::Parts(parts.to_vec()),
        }
    }
    ChatContent::Text(texts.join("\n"))
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) {
        "ERROR: "
    } else {
        ""
    };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => prefix.to_string(),
    }
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

pub fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto => ChatToolChoice::String("auto".to_string()),
        ToolChoice::Required => ChatToolChoice::String("required".to_string()),
        ToolChoice::Specific { name } => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::*;
    use serde_json::json;

    fn weather_tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: Some("Get current weather for a city".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        }
    }

    #[test]
    fn test_system_prompt_becomes_leading_message() {
        let mut req = MessagesRequest::new("gpt-4o", 1024, vec![Message::user("Hi")]);
        req.system = Some(SystemContent::Text("Be terse".to_string()));

        let result = anthropic_to_openai(&req).unwrap();

        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.max_tokens, Some(1024));
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, ChatRole::System);
        assert_eq!(result.messages[0].content_text(), Some("Be terse"));
        assert_eq!(result.messages[1].role, ChatRole::User);
        assert_eq!(result.messages[1].content_text(), Some("Hi"));
    }

    #[test]
    fn test_empty_system_prompt_is_dropped() {
        let mut req = MessagesRequest::new("gpt-4o", 16, vec![Message::user("Hi")]);
        req.system = Some(SystemContent::Text(String::new()));

        let result = anthropic_to_openai(&req).unwrap();
        assert_eq!(result.messages.len(), 1);
    }

    #[test]
    fn test_missing_fields_are_validation_errors() {
        let no_model = MessagesRequest::new("", 10, vec![Message::user("Hi")]);
        assert!(matches!(
            anthropic_to_openai(&no_model),
            Err(BridgeError::Validation { .. })
        ));

        let no_messages = MessagesRequest::new("gpt-4o", 10, Vec::new());
        assert!(matches!(
            anthropic_to_openai(&no_messages),
            Err(BridgeError::Validation { .. })
        ));

        let mut no_max_tokens = MessagesRequest::new("gpt-4o", 10, vec![Message::user("Hi")]);
        no_max_tokens.max_tokens = None;
        let err = anthropic_to_openai(&no_max_tokens).unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_consecutive_text_blocks_are_joined() {
        let req = MessagesRequest::new(
            "gpt-4o",
            100,
            vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Text {
                        text: "first".to_string(),
                    },
                    ContentBlock::Text {
                        text: "second".to_string(),
                    },
                ]),
            }],
        );

        let result = anthropic_to_openai(&req).unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content_text(), Some("first\nsecond"));
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_calls() {
        let req = MessagesRequest::new(
            "gpt-4o",
            100,
            vec![
                Message::user("Weather in Paris and Rome?"),
                Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(vec![
                        ContentBlock::ToolUse {
                            id: "call_1".to_string(),
                            name: "get_weather".to_string(),
                            input: json!({"city": "Paris"}),
                        },
                        ContentBlock::ToolUse {
                            id: "call_2".to_string(),
                            name: "get_weather".to_string(),
                            input: json!({"city": "Rome"}),
                        },
                    ]),
                },
            ],
        );

        let result = anthropic_to_openai(&req).unwrap();
        let assistant = &result.messages[1];

        assert_eq!(assistant.role, ChatRole::Assistant);
        assert_eq!(assistant.content_text(), Some(""));
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].call_type, "function");
        assert_eq!(calls[1].function.name, "get_weather");
        let args: serde_json::Value = serde_json::from_str(&calls[1].function.arguments).unwrap();
        assert_eq!(args, json!({"city": "Rome"}));
    }

    #[test]
    fn test_tool_result_splits_into_tool_messages() {
        let req = MessagesRequest::new(
            "test",
            1024,
            vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::ToolResult {
                        tool_use_id: "call_1".to_string(),
                        content: Some(ToolResultContent::Text("18C".to_string())),
                        is_error: None,
                    },
                    ContentBlock::ToolResult {
                        tool_use_id: "call_2".to_string(),
                        content: Some(ToolResultContent::Text("timeout".to_string())),
                        is_error: Some(true),
                    },
                    ContentBlock::Text {
                        text: "Now continue".to_string(),
                    },
                ]),
            }],
        );

        let result = anthropic_to_openai(&req).unwrap();

        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[0].role, ChatRole::Tool);
        assert_eq!(result.messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(result.messages[0].content_text(), Some("18C"));
        assert_eq!(result.messages[1].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(result.messages[1].content_text(), Some("ERROR: timeout"));
        assert_eq!(result.messages[2].role, ChatRole::User);
        assert_eq!(result.messages[2].content_text(), Some("Now continue"));
    }

    #[test]
    fn test_tool_use_in_user_message_is_rejected() {
        let req = MessagesRequest::new(
            "test",
            10,
            vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "search".to_string(),
                    input: json!({}),
                }]),
            }],
        );

        let err = anthropic_to_openai(&req).unwrap_err();
        assert!(err.to_string().contains("messages[0]"));
    }

    #[test]
    fn test_tool_role_message_carries_only_tool_results() {
        let tool_message = |content: MessageContent| {
            MessagesRequest::new(
                "test",
                10,
                vec![
                    Message::user("What's the weather?"),
                    Message {
                        role: Role::Tool,
                        content,
                    },
                ],
            )
        };

        let ok = tool_message(MessageContent::Blocks(vec![ContentBlock::ToolResult {
            tool_use_id: "call_1".to_string(),
            content: Some(ToolResultContent::Text("18C".to_string())),
            is_error: None,
        }]));
        let result = anthropic_to_openai(&ok).unwrap();
        assert_eq!(result.messages[1].role, ChatRole::Tool);
        assert_eq!(result.messages[1].tool_call_id.as_deref(), Some("call_1"));

        let rejected = [
            MessageContent::Blocks(vec![ContentBlock::Text {
                text: "18C".to_string(),
            }]),
            MessageContent::Blocks(vec![]),
            MessageContent::Text("18C".to_string()),
        ];
        for content in rejected {
            let err = anthropic_to_openai(&tool_message(content)).unwrap_err();
            assert!(matches!(err, BridgeError::Validation { .. }));
            assert_eq!(
                err.to_string(),
                "Validation error: messages[1]: tool messages may only contain tool_result blocks"
            );
        }
    }

    #[test]
    fn test_image_block_becomes_data_uri_part() {
        let req = MessagesRequest::new(
            "gpt-4o",
            10,
            vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Text {
                        text: "What is this?".to_string(),
                    },
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64".to_string(),
                            media_type: "image/png".to_string(),
                            data: "iVBORw0KGgo=".to_string(),
                        },
                    },
                ]),
            }],
        );

        let result = anthropic_to_openai(&req).unwrap();
        match result.messages[0].content {
            Some(ChatContent::Parts(ref parts)) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    ContentPart::ImageUrl {
                        image_url: ImageUrlDetail {
                            url: "data:image/png;base64,iVBORw0KGgo=".to_string(),
                            detail: None,
                        }
                    }
                );
            }
            ref other => panic!("Expected multi-part content, got {other:?}"),
        }
    }

    #[test]
    fn test_tools_and_specific_tool_choice() {
        let mut req = MessagesRequest::new("gpt-4o", 10, vec![Message::user("Weather?")]);
        req.tools = Some(vec![weather_tool("get_weather"), weather_tool("get_forecast")]);
        req.tool_choice = Some(ToolChoice::Specific {
            name: "get_weather".to_string(),
        });

        let result = anthropic_to_openai(&req).unwrap();

        let tools = result.tools.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].function.name, "get_weather");
        assert_eq!(tools[0].function.parameters["required"], json!(["city"]));

        let choice = serde_json::to_value(result.tool_choice.unwrap()).unwrap();
        assert_eq!(
            choice,
            json!({"type": "function", "function": {"name": "get_weather"}})
        );
    }

    #[test]
    fn test_tool_choice_table() {
        assert_eq!(
            translate_tool_choice(&ToolChoice::Auto),
            ChatToolChoice::String("auto".to_string())
        );
        assert_eq!(
            translate_tool_choice(&ToolChoice::Required),
            ChatToolChoice::String("required".to_string())
        );
    }

    #[test]
    fn test_sampling_fields_copy_through() {
        let mut req = MessagesRequest::new("gpt-4o", 256, vec![Message::user("Hi")]);
        req.temperature = Some(0.2);
        req.top_p = Some(0.9);
        req.stop_sequences = Some(vec!["END".to_string()]);
        req.stream = Some(true);
        req.metadata = Some(Metadata {
            user_id: Some("user-42".to_string()),
        });

        let result = anthropic_to_openai(&req).unwrap();
        assert_eq!(result.temperature, Some(0.2));
        assert_eq!(result.top_p, Some(0.9));
        assert_eq!(result.stop, Some(vec!["END".to_string()]));
        assert_eq!(result.stream, Some(true));
        assert_eq!(result.user.as_deref(), Some("user-42"));
    }

    #[test]
    fn test_pass_through_fields_round_trip() {
        let req = MessagesRequest::new(
            "some-unknown-model",
            100,
            vec![
                Message::user("hello there"),
                Message::assistant("general kenobi"),
            ],
        );

        let result = anthropic_to_openai(&req).unwrap();
        let recovered: Vec<&str> = result
            .messages
            .iter()
            .filter_map(ChatMessage::content_text)
            .collect();

        assert_eq!(result.model, "some-unknown-model");
        assert_eq!(result.max_tokens, Some(100));
        assert_eq!(recovered, vec!["hello there", "general kenobi"]);
    }
}
