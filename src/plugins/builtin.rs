use super::{RequestContext, RequestMiddleware};
use crate::api::types::{ContentBlock, MessageContent, MessagesRequest};
use crate::llm::{ImageCache, ImagePayload, Role};
use anyhow::Result;
use async_trait::async_trait;

/// Moves inline base64 images of user turns into the image cache and
/// leaves an `[Image #n: <key>]` marker in their place. The key resolves
/// through `GET /v1/images/:key`.
pub struct ImageCacheMiddleware;

#[async_trait]
impl RequestMiddleware for ImageCacheMiddleware {
    fn name(&self) -> &str {
        "image-cache"
    }

    async fn apply(&self, request: &mut MessagesRequest, ctx: &RequestContext) -> Result<()> {
        let mut ordinal = 0;

        for message in request.messages.iter_mut().filter(|m| m.role == Role::User) {
            let MessageContent::Blocks(blocks) = &mut message.content else {
                continue;
            };

            for block in blocks.iter_mut() {
                let ContentBlock::Image { source } = block else {
                    continue;
                };
                let Some(data) = source.data.clone().filter(|_| source.kind == "base64") else {
                    continue;
                };

                ordinal += 1;
                let key = ImageCache::key(&ctx.request_id, ordinal);
                ctx.images.store_image(
                    key.clone(),
                    ImagePayload {
                        media_type: source.media_type.clone().unwrap_or_else(|| "image/png".to_string()),
                        data,
                    },
                );
                tracing::debug!("Cached image {}", key);
                *block = ContentBlock::text(format!("[Image #{}: {}]", ordinal, key));
            }
        }

        Ok(())
    }
}

/// Removes empty text blocks, then messages left with nothing in them.
pub struct DropEmptyTextMiddleware;

#[async_trait]
impl RequestMiddleware for DropEmptyTextMiddleware {
    fn name(&self) -> &str {
        "drop-empty-text"
    }

    async fn apply(&self, request: &mut MessagesRequest, _ctx: &RequestContext) -> Result<()> {
        for message in &mut request.messages {
            if let MessageContent::Blocks(blocks) = &mut message.content {
                blocks.retain(|block| !matches!(block, ContentBlock::Text { text } if text.trim().is_empty()));
            }
        }

        let before = request.messages.len();
        request.messages.retain(|message| match &message.content {
            MessageContent::Text(text) => !text.trim().is_empty(),
            MessageContent::Blocks(blocks) => !blocks.is_empty(),
        });

        let dropped = before - request.messages.len();
        if dropped > 0 {
            tracing::debug!("Dropped {} empty messages", dropped);
        }
        Ok(())
    }
}
