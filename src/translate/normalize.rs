use crate::api::types::{ContentBlock, MessageContent, MessagesRequest, ToolSpec};
use crate::llm::{
    ChatContent, ChatMessage, ChatRequest, ChatTool, ContentPart, FunctionCall, FunctionSpec,
    ImageUrl, Role, ToolCall,
};
use serde_json::Value;

/// Tool name that is never forwarded to a backend
pub const RESERVED_TOOL: &str = "StickerRequest";

/// Convert a Messages API request into a chat-completion request.
///
/// Message order is preserved. The only things dropped are the reserved
/// tool and messages that end up with no content.
pub fn normalize(request: &MessagesRequest) -> ChatRequest {
    let mut messages: Vec<ChatMessage> = request
        .system_texts()
        .into_iter()
        .map(|text| ChatMessage::text(Role::System, text))
        .collect();

    for message in &request.messages {
        match &message.content {
            MessageContent::Text(text) => messages.push(ChatMessage::text(message.role, text.clone())),
            MessageContent::Blocks(blocks) => match message.role {
                Role::Assistant => messages.extend(flatten_assistant(blocks)),
                Role::User => messages.extend(flatten_user(blocks)),
                other => messages.push(flatten_other(other, blocks)),
            },
        }
    }

    ChatRequest {
        model: request.model.clone(),
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: request.stream,
        tools: convert_tools(request.tools.as_deref()),
    }
}

/// Rewrite tool specs into function-call shape, minus the reserved tool.
pub fn convert_tools(tools: Option<&[ToolSpec]>) -> Option<Vec<ChatTool>> {
    let converted: Vec<ChatTool> = tools?
        .iter()
        .filter(|tool| tool.name != RESERVED_TOOL)
        .map(|tool| ChatTool {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect();

    if converted.is_empty() {
        None
    } else {
        Some(converted)
    }
}

fn flatten_assistant(blocks: &[ContentBlock]) -> Option<ChatMessage> {
    let text = blocks
        .iter()
        .filter_map(block_text)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    let tool_calls: Vec<ToolCall> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            _ => None,
        })
        .collect();

    if text.is_empty() && tool_calls.is_empty() {
        return None;
    }

    Some(ChatMessage {
        role: Role::Assistant,
        content: ChatContent::Text(text),
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    })
}

fn flatten_user(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut out = Vec::new();

    let text = blocks
        .iter()
        .filter_map(block_text)
        .collect::<Vec<_>>()
        .join("\n");

    let images: Vec<ContentPart> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Image { source } => source.to_url().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            }),
            _ => None,
        })
        .collect();

    if images.is_empty() {
        if !text.is_empty() {
            out.push(ChatMessage::text(Role::User, text));
        }
    } else {
        let mut parts = Vec::with_capacity(images.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::Text { text });
        }
        parts.extend(images);
        out.push(ChatMessage {
            role: Role::User,
            content: ChatContent::Parts(parts),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for block in blocks {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = block
        {
            out.push(ChatMessage::tool_result(tool_use_id.clone(), stringify_result(content)));
        }
    }

    out
}

/// Text blocks as-is; unmodelled block types as their JSON so nothing is lost.
fn block_text(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::Text { text } => Some(text.clone()),
        ContentBlock::Other(_) => Some(block.to_plain_text()),
        _ => None,
    }
}

fn flatten_other(role: Role, blocks: &[ContentBlock]) -> ChatMessage {
    let content = blocks
        .iter()
        .map(ContentBlock::to_plain_text)
        .collect::<Vec<_>>()
        .join("\n");
    ChatMessage::text(role, content)
}

/// Tool results go through as-is when already a string, else as JSON.
pub fn stringify_result(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
