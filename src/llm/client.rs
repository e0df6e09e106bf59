use super::{ChatCompletion, ChatCompletionChunk, ChatRequest};
use crate::sse::{SseData, SseEvent, SseParser};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Chunks buffered between the backend reader and the translator. The reader
/// waits when the buffer is full.
const STREAM_BUFFER: usize = 32;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("backend stream failed: {0}")]
    Stream(String),
}

/// Where a chat-completion call goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl BackendTarget {
    /// Full chat-completions URL for this backend
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, LlmError>> + Send>>;

/// A chat-completion backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Single non-streaming completion
    async fn complete(
        &self,
        target: &BackendTarget,
        request: ChatRequest,
    ) -> Result<ChatCompletion, LlmError>;

    /// Streaming completion. Dropping the returned stream abandons the read.
    async fn stream(
        &self,
        target: &BackendTarget,
        request: ChatRequest,
    ) -> Result<ChunkStream, LlmError>;
}

/// HTTP implementation for OpenAI-compatible endpoints
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build tuned HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self { http }
    }

    async fn send(
        &self,
        target: &BackendTarget,
        mut request: ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        request.model = target.model.clone();
        request.stream = stream;

        let url = target.endpoint();
        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = target.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            "POST {} model={} stream={} messages={}",
            url,
            request.model,
            stream,
            request.messages.len()
        );

        let response = builder
            .send()
            .await
            .map_err(|source| LlmError::Transport { url, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn complete(
        &self,
        target: &BackendTarget,
        request: ChatRequest,
    ) -> Result<ChatCompletion, LlmError> {
        let response = self.send(target, request, false).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))
    }

    async fn stream(
        &self,
        target: &BackendTarget,
        request: ChatRequest,
    ) -> Result<ChunkStream, LlmError> {
        let response = self.send(target, request, true).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(pump_stream(response.bytes_stream(), tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

type ChunkSender = mpsc::Sender<Result<ChatCompletionChunk, LlmError>>;

/// Read the SSE body, forwarding decoded chunks until `[DONE]`, an error,
/// or the receiver going away. A dropped receiver is noticed even while the
/// backend is idle.
async fn pump_stream<S, B, E>(body: S, tx: ChunkSender)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures::pin_mut!(body);
    let mut parser = SseParser::new();

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("Stream consumer dropped, abandoning backend read");
                return;
            }
            next = body.next() => next,
        };

        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                let _ = tx.send(Err(LlmError::Stream(e.to_string()))).await;
                return;
            }
            None => break,
        };

        for event in parser.feed(bytes.as_ref()) {
            if !forward_event(event, &tx).await {
                return;
            }
        }
    }

    if let Some(event) = parser.finish() {
        forward_event(event, &tx).await;
    }
}

/// Returns false once nothing more should be read.
async fn forward_event(event: SseEvent, tx: &ChunkSender) -> bool {
    let item = match decode_chunk(event) {
        Decoded::Chunk(chunk) => Ok(chunk),
        Decoded::Done => return false,
        Decoded::Skip => return true,
        Decoded::Failed(err) => Err(err),
    };
    let keep_reading = item.is_ok();

    if tx.send(item).await.is_err() {
        tracing::debug!("Stream consumer dropped, abandoning backend read");
        return false;
    }
    keep_reading
}

enum Decoded {
    Chunk(ChatCompletionChunk),
    Done,
    Skip,
    Failed(LlmError),
}

fn decode_chunk(event: SseEvent) -> Decoded {
    match event.data {
        SseData::Done => Decoded::Done,
        SseData::Json(value) => {
            if let Some(error) = value.get("error") {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Decoded::Failed(LlmError::Stream(message));
            }
            match serde_json::from_value(value) {
                Ok(chunk) => Decoded::Chunk(chunk),
                Err(e) => Decoded::Failed(LlmError::Decode(e.to_string())),
            }
        }
        SseData::Raw(text) if text.trim().is_empty() => Decoded::Skip,
        SseData::Raw(text) => Decoded::Failed(LlmError::Decode(format!(
            "unexpected non-JSON stream data: {}",
            text
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, Role};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "placeholder".to_string(),
            messages: vec![ChatMessage::text(Role::User, "hi")],
            temperature: None,
            max_tokens: None,
            stream: false,
            tools: None,
        }
    }

    fn target(base_url: String) -> BackendTarget {
        BackendTarget {
            base_url,
            api_key: Some("sk-test".to_string()),
            model: "deepseek-chat".to_string(),
        }
    }

    #[test]
    fn test_endpoint_joining() {
        let mut t = target("https://api.example.com/v1/".to_string());
        assert_eq!(t.endpoint(), "https://api.example.com/v1/chat/completions");
        t.base_url = "https://api.example.com/v1/chat/completions".to_string();
        assert_eq!(t.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_complete_sends_target_model_and_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"deepseek-chat","stream":false}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"c1","model":"deepseek-chat","choices":[{"message":{"content":"hello"},"finish_reason":"stop"}]}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new();
        let completion = backend
            .complete(&target(format!("{}/v1", server.url())), request())
            .await
            .unwrap();

        assert_eq!(completion.text(), "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let err = HttpBackend::new()
            .complete(&target(server.url()), request())
            .await
            .unwrap_err();

        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_decodes_chunks_until_done() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJsonString(r#"{"stream":true}"#.to_string()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let stream = HttpBackend::new()
            .stream(&target(server.url()), request())
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;

        assert_eq!(chunks.len(), 2);
        let text: String = chunks
            .into_iter()
            .map(|c| c.unwrap().choices[0].delta.content.clone().unwrap())
            .collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_stream_error_payload_ends_stream() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let stream = HttpBackend::new()
            .stream(&target(server.url()), request())
            .await
            .unwrap();
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        match &items[1] {
            Err(LlmError::Stream(message)) => assert_eq!(message, "overloaded"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_skips_blocks_without_data() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "event: ping\n\n",
            "id: 3\n\n",
            "data:\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let stream = HttpBackend::new()
            .stream(&target(server.url()), request())
            .await
            .unwrap();
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        let chunk = items.into_iter().next().unwrap().unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_dropped_consumer_abandons_idle_backend() {
        let idle_body = futures::stream::pending::<Result<Vec<u8>, std::io::Error>>();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let reader = tokio::spawn(pump_stream(idle_body, tx));

        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader should stop once the consumer is gone")
            .unwrap();
    }
}
