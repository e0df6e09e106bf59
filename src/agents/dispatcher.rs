use super::{alternate_roles, find, without_tools, AgentDescriptor, AgentKind, AgentRole, DESCRIPTORS};
use crate::config::{AgentBackendConfig, AgentsConfig};
use crate::llm::{BackendTarget, ChatBackend, ChatCompletion, ChatMessage, ChatRequest, Role};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the gateway does with a dispatched request
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Final answer, produced without streaming
    Answer(ChatCompletion),
    /// Send this conversation to the routed backend
    Terminal(ChatRequest),
}

pub struct AgentDispatcher {
    backend: Arc<dyn ChatBackend>,
    classifier: BackendTarget,
    coder: Option<BackendTarget>,
    reasoner: Option<BackendTarget>,
    max_depth: usize,
}

impl AgentDispatcher {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &AgentsConfig) -> Result<Self> {
        let classifier = config
            .classifier
            .as_ref()
            .map(target)
            .context("agents.classifier is not configured")?;

        Ok(Self {
            backend,
            classifier,
            coder: config.coder.as_ref().map(target),
            reasoner: config.reasoner.as_ref().map(target),
            max_depth: config.max_depth.max(1),
        })
    }

    /// Agents the classifier may pick from. Escalating agents without a
    /// configured backend are left out.
    pub fn available(&self) -> Vec<&'static AgentDescriptor> {
        DESCRIPTORS
            .iter()
            .filter(|d| self.backend_for(d.role).is_some() || d.kind == AgentKind::Terminal)
            .collect()
    }

    /// Run the classify / escalate loop for one request.
    pub async fn dispatch(&self, request: ChatRequest) -> Result<DispatchOutcome> {
        let mut conversation = request;
        let mut last_answer: Option<ChatCompletion> = None;

        for depth in 0..self.max_depth {
            let reply = self.classify(&conversation).await?;
            let reply_text = reply.text();

            let Some(agent) = self.select(&reply_text) else {
                debug!("Classifier did not pick an agent, returning its reply");
                return Ok(DispatchOutcome::Answer(reply));
            };

            info!("Agent selected: {} (depth {})", agent.name, depth);

            if agent.kind == AgentKind::Terminal {
                return Ok(DispatchOutcome::Terminal(conversation));
            }

            let answer = match self.invoke(agent, &conversation).await {
                Ok(answer) => answer,
                Err(e) => {
                    error!("Agent {} failed: {:#}", agent.name, e);
                    return Err(e);
                }
            };

            conversation
                .messages
                .push(ChatMessage::text(Role::Assistant, answer.text()));
            last_answer = Some(answer);
        }

        warn!(
            "Agent escalation reached max depth {}, returning last agent output",
            self.max_depth
        );
        Ok(match last_answer {
            Some(answer) => DispatchOutcome::Answer(answer),
            None => DispatchOutcome::Terminal(conversation),
        })
    }

    async fn classify(&self, conversation: &ChatRequest) -> Result<ChatCompletion> {
        let mut messages = vec![ChatMessage::text(Role::System, self.classifier_prompt())];
        messages.extend(without_tools(&conversation.messages));

        let request = ChatRequest {
            model: self.classifier.model.clone(),
            messages,
            temperature: Some(0.0),
            max_tokens: None,
            stream: false,
            tools: None,
        };

        self.backend
            .complete(&self.classifier, request)
            .await
            .context("Classifier call failed")
    }

    async fn invoke(&self, agent: &AgentDescriptor, conversation: &ChatRequest) -> Result<ChatCompletion> {
        let target = self
            .backend_for(agent.role)
            .with_context(|| format!("No backend configured for agent {}", agent.name))?;

        let mut messages = if agent.tools_enabled {
            conversation.messages.clone()
        } else {
            without_tools(&conversation.messages)
        };
        if agent.strict_alternation {
            messages = alternate_roles(&messages);
        }

        let request = ChatRequest {
            model: target.model.clone(),
            messages,
            temperature: conversation.temperature,
            max_tokens: conversation.max_tokens,
            stream: false,
            tools: if agent.tools_enabled {
                conversation.tools.clone()
            } else {
                None
            },
        };

        self.backend
            .complete(target, request)
            .await
            .with_context(|| format!("Agent {} call failed", agent.name))
    }

    fn select(&self, reply: &str) -> Option<&'static AgentDescriptor> {
        let name = parse_choice(reply)?;
        match find(&name) {
            Some(agent) if self.available().iter().any(|a| a.name == agent.name) => Some(agent),
            _ => {
                warn!("Classifier picked unknown agent '{}'", name);
                None
            }
        }
    }

    fn backend_for(&self, role: AgentRole) -> Option<&BackendTarget> {
        match role {
            AgentRole::Tool => None,
            AgentRole::Coder => self.coder.as_ref(),
            AgentRole::Reasoner => self.reasoner.as_ref(),
        }
    }

    fn classifier_prompt(&self) -> String {
        let mut prompt = String::from(
            "You route a conversation to the agent best suited to produce the next reply.\n\nAgents:\n",
        );
        for agent in self.available() {
            prompt.push_str(&format!("- {}: {}\n", agent.name, agent.description));
        }
        prompt.push_str(
            "\nReply with a single JSON object and nothing else, for example {\"use\": \"tool\"}.",
        );
        prompt
    }
}

fn target(config: &AgentBackendConfig) -> BackendTarget {
    BackendTarget {
        base_url: config.base_url.clone(),
        api_key: config.api_key.clone(),
        model: config.model.clone(),
    }
}

/// Agent name from the first top-level JSON object in `text` that has a
/// string `use` field.
pub fn parse_choice(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let object = start.take().map(|s| &text[s..=i])?;
                    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(object) {
                        if let Some(name) = map.get("use").and_then(Value::as_str) {
                            return Some(name.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}
