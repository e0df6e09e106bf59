//! Token budget estimation used by the model router.
//!
//! Counts are advisory: they pick a backend, they do not enforce limits.

use crate::api::types::{ContentBlock, MessageContent, MessagesRequest};
use once_cell::sync::Lazy;
use serde_json::Value;
use tiktoken_rs::CoreBPE;

static TOKENIZER: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("Failed to load cl100k tokenizer, token counts will be 0: {}", e);
        None
    }
});

/// Estimate the token budget of a request.
///
/// Never fails: when the tokenizer is unavailable the count is 0 and the
/// router falls through to its non-size rules.
pub fn estimate(request: &MessagesRequest) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => count_with(request, &|text| bpe.encode_ordinary(text).len()),
        None => 0,
    }
}

fn count_with(request: &MessagesRequest, encode: &dyn Fn(&str) -> usize) -> usize {
    let mut total = 0;

    for message in &request.messages {
        match &message.content {
            MessageContent::Text(text) => total += encode(text),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    total += count_block(block, encode);
                }
            }
        }
    }

    for text in request.system_texts() {
        total += encode(&text);
    }

    for tool in request.tools.iter().flatten() {
        let header = format!("{}{}", tool.name, tool.description.as_deref().unwrap_or(""));
        total += encode(&header);
        total += encode(&tool.input_schema.to_string());
    }

    total
}

fn count_block(block: &ContentBlock, encode: &dyn Fn(&str) -> usize) -> usize {
    match block {
        ContentBlock::Text { text } => encode(text),
        ContentBlock::ToolUse { input, .. } => encode(&input.to_string()),
        ContentBlock::ToolResult { content, .. } => match content {
            Value::String(text) => encode(text),
            other => encode(&other.to_string()),
        },
        ContentBlock::Thinking { thinking, .. } => encode(thinking),
        ContentBlock::Image { .. } => 0,
        ContentBlock::Other(value) => encode(&value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    // One "token" per whitespace-separated word keeps the arithmetic visible.
    fn words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    #[test]
    fn test_every_fragment_contributes() {
        let req = request(json!({
            "model": "m",
            "system": "you are terse",
            "messages": [
                {"role": "user", "content": "one two three"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "four five"},
                    {"type": "tool_use", "id": "t1", "name": "f", "input": {"x": 1}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "six seven"}
                ]}
            ],
            "tools": [{"name": "f", "description": " does things", "input_schema": {"type": "object"}}]
        }));

        // 3 system + 3 + 2 + 1 (input json) + 2 (result) + 3 ("f does things") + 1 (schema)
        assert_eq!(count_with(&req, &words), 15);
    }

    #[test]
    fn test_structured_tool_result_is_stringified() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "a b"}]}
            ]}]
        }));
        assert_eq!(count_with(&req, &|text: &str| text.len()), json!([{"type": "text", "text": "a b"}]).to_string().len());
    }

    #[test]
    fn test_estimate_is_stable() {
        let req = request(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hello world, this is a longer sentence"}]
        }));
        let first = estimate(&req);
        assert_eq!(first, estimate(&req));
        assert!(first > 0);
    }

    #[test]
    fn test_empty_request_is_zero() {
        let req = request(json!({"model": "m", "messages": []}));
        assert_eq!(estimate(&req), 0);
    }
}
