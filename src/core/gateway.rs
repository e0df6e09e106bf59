use super::session::session_id;
use crate::agents::{AgentDispatcher, DispatchOutcome};
use crate::api::types::{MessageEvent, MessagesRequest, MessagesResponse, Usage};
use crate::config::Config;
use crate::llm::{
    tokens, BackendTarget, ChatBackend, ChatRequest, HttpBackend, ImageCache, LlmError, ModelRouter,
    RouteInput, RoutingError, UsageCache,
};
use crate::plugins::{Pipeline, RequestContext};
use crate::translate::{normalize, translate_completion, StreamTranslator};
use anyhow::Context;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events buffered toward a slow client before the backend read pauses
const EVENT_BUFFER: usize = 32;

pub type EventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

pub enum GatewayResponse {
    Message(MessagesResponse),
    Stream(EventStream),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Backend(#[from] LlmError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Request orchestration: middleware, token estimate, routing, optional
/// agent dispatch, backend call and translation back to the Messages API.
pub struct Gateway {
    router: ModelRouter,
    backend: Arc<dyn ChatBackend>,
    dispatcher: Option<AgentDispatcher>,
    pipeline: Pipeline,
    images: Arc<ImageCache>,
    usage: Arc<UsageCache>,
}

impl Gateway {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_backend(config, Arc::new(HttpBackend::new()))
    }

    pub fn with_backend(config: &Config, backend: Arc<dyn ChatBackend>) -> anyhow::Result<Self> {
        let dispatcher = if config.agents.enabled {
            Some(AgentDispatcher::new(backend.clone(), &config.agents).context("Failed to set up agents")?)
        } else {
            None
        };

        let cache = &config.cache;
        Ok(Self {
            router: ModelRouter::new(&config.router, &config.providers),
            backend,
            dispatcher,
            pipeline: Pipeline::from_names(&config.middleware)?,
            images: Arc::new(ImageCache::with_limits(
                cache.image_capacity,
                Duration::from_secs(cache.image_ttl_secs),
            )),
            usage: Arc::new(UsageCache::with_capacity(cache.usage_capacity)),
        })
    }

    pub fn images(&self) -> &Arc<ImageCache> {
        &self.images
    }

    pub fn usage(&self) -> &Arc<UsageCache> {
        &self.usage
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn count_tokens(&self, request: &MessagesRequest) -> usize {
        tokens::estimate(request)
    }

    /// Serve one Messages API request.
    ///
    /// Routing and configuration errors are returned before any backend is
    /// contacted. Once a stream has started, backend failures are reported
    /// inside the stream instead.
    pub async fn handle(&self, mut request: MessagesRequest) -> Result<GatewayResponse, GatewayError> {
        let request_id = Uuid::new_v4().simple().to_string();
        let ctx = RequestContext::new(request_id.clone(), self.images.clone());

        self.pipeline.apply(&mut request, &ctx).await?;

        let token_count = tokens::estimate(&request);
        let session = session_id(&request);
        let last_usage = session.as_deref().and_then(|s| self.usage.get(s));

        let decision = self.router.route(&RouteInput {
            model: &request.model,
            token_count,
            thinking: request.thinking_enabled(),
            last_usage,
        })?;
        let provider = self.router.provider(&decision.provider)?;
        let target = BackendTarget {
            base_url: provider.api_base_url.clone(),
            api_key: provider.api_key.clone(),
            model: decision.model.clone(),
        };

        info!(
            "[{}] {} -> {},{} ({}, ~{} tokens, stream={})",
            request_id, request.model, decision.provider, decision.model, decision.reason, token_count, request.stream
        );

        let mut chat = normalize(&request);

        if let Some(dispatcher) = &self.dispatcher {
            match dispatcher.dispatch(chat).await? {
                DispatchOutcome::Answer(completion) => {
                    debug!("[{}] answered by agent loop", request_id);
                    if request.stream {
                        let mut translator = StreamTranslator::new(request.model.clone());
                        let events = translator.push_completion(&completion);
                        return Ok(GatewayResponse::Stream(Box::pin(futures::stream::iter(events))));
                    }
                    return Ok(GatewayResponse::Message(translate_completion(&completion, &request.model)));
                }
                DispatchOutcome::Terminal(conversation) => chat = conversation,
            }
        }

        if request.stream {
            return Ok(GatewayResponse::Stream(self.spawn_stream(
                request_id,
                request.model,
                target,
                chat,
                session,
            )));
        }

        let completion = self.backend.complete(&target, chat).await?;
        let response = translate_completion(&completion, &request.model);
        if let Some(session) = session {
            self.usage.record(&session, response.usage);
        }
        Ok(GatewayResponse::Message(response))
    }

    fn spawn_stream(
        &self,
        request_id: String,
        model: String,
        target: BackendTarget,
        chat: ChatRequest,
        session: Option<String>,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let backend = self.backend.clone();
        let usage = self.usage.clone();

        tokio::spawn(async move {
            let mut translator = StreamTranslator::new(model);
            if !send_all(&tx, translator.start()).await {
                return;
            }

            match backend.stream(&target, chat).await {
                Ok(mut chunks) => {
                    while let Some(next) = chunks.next().await {
                        let events = match next {
                            Ok(chunk) => translator.push_chunk(&chunk),
                            Err(e) => {
                                let events = translator.push_error(&e);
                                send_all(&tx, events).await;
                                break;
                            }
                        };
                        if !send_all(&tx, events).await {
                            debug!("[{}] client went away, abandoning backend stream", request_id);
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("[{}] backend stream failed to start: {}", request_id, e);
                    send_all(&tx, translator.push_error(&e)).await;
                }
            }

            send_all(&tx, translator.finish()).await;

            let reported: Usage = translator.usage();
            if let Some(session) = session {
                usage.record(&session, reported);
            }
            debug!("[{}] stream complete", request_id);
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// False once the client has gone away.
async fn send_all(tx: &mpsc::Sender<MessageEvent>, events: Vec<MessageEvent>) -> bool {
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}
