//! Optional escalation layer in front of the model router.
//!
//! A small classifier model picks one of a fixed set of agents. Escalating
//! agents answer privately and their output is fed back into the
//! conversation; the terminal agent hands the request to the routed backend.

pub mod dispatcher;

pub use dispatcher::{parse_choice, AgentDispatcher, DispatchOutcome};

use crate::llm::{ChatContent, ChatMessage, Role};

/// Appended for the reasoner when the conversation ends on an assistant turn
pub const CONTINUATION_PROMPT: &str = "Please continue from where the conversation left off.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    /// Output ends the loop
    Terminal,
    /// Output goes back into the conversation
    Escalating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Tool,
    Coder,
    Reasoner,
}

#[derive(Debug, Clone, Copy)]
pub struct AgentDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub role: AgentRole,
    pub kind: AgentKind,
    /// Whether tool definitions are forwarded to this agent
    pub tools_enabled: bool,
    /// Whether the agent needs strict user/assistant alternation
    pub strict_alternation: bool,
}

pub const TOOL_AGENT: AgentDescriptor = AgentDescriptor {
    name: "tool",
    description: "Calls the client's tools or answers directly. Choose it when the next step is a tool call, \
                  a short reply, or when no other agent clearly fits.",
    role: AgentRole::Tool,
    kind: AgentKind::Terminal,
    tools_enabled: true,
    strict_alternation: false,
};

pub const CODER_AGENT: AgentDescriptor = AgentDescriptor {
    name: "coder",
    description: "Writes or rewrites substantial code. Choose it when the user asks for new code, \
                  a refactor, or a fix that needs more than a few lines.",
    role: AgentRole::Coder,
    kind: AgentKind::Escalating,
    tools_enabled: false,
    strict_alternation: false,
};

pub const REASONER_AGENT: AgentDescriptor = AgentDescriptor {
    name: "reasoner",
    description: "Thinks through hard problems step by step. Choose it for planning, debugging a \
                  subtle failure, or questions that need careful multi-step reasoning.",
    role: AgentRole::Reasoner,
    kind: AgentKind::Escalating,
    tools_enabled: false,
    strict_alternation: true,
};

pub const DESCRIPTORS: &[AgentDescriptor] = &[TOOL_AGENT, CODER_AGENT, REASONER_AGENT];

pub fn find(name: &str) -> Option<&'static AgentDescriptor> {
    DESCRIPTORS.iter().find(|d| d.name == name.trim())
}

/// Rewrite a conversation for a backend that receives no tool definitions.
///
/// Tool calls and tool results become plain text so the backend still sees
/// what happened.
pub fn without_tools(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::Tool => ChatMessage::text(
                Role::User,
                format!(
                    "[tool result {}]\n{}",
                    message.tool_call_id.as_deref().unwrap_or("?"),
                    message.content.as_text()
                ),
            ),
            Role::Assistant if message.tool_calls.is_some() => {
                let mut lines = vec![message.content.as_text()];
                for call in message.tool_calls.iter().flatten() {
                    lines.push(format!("[called {} with {}]", call.function.name, call.function.arguments));
                }
                let text = lines
                    .into_iter()
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                ChatMessage::text(Role::Assistant, text)
            }
            _ => message.clone(),
        })
        .collect()
}

/// Force strict user/assistant alternation.
///
/// System messages are merged to the front, consecutive turns of the same
/// role are joined, and a continuation prompt is appended when the last
/// turn is the assistant's.
pub fn alternate_roles(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut system: Vec<String> = Vec::new();
    let mut turns: Vec<(Role, String)> = Vec::new();

    for message in messages {
        let text = message.content.as_text();
        match message.role {
            Role::System => system.push(text),
            role => {
                let role = if role == Role::Assistant { Role::Assistant } else { Role::User };
                match turns.last_mut() {
                    Some((last, joined)) if *last == role => {
                        joined.push_str("\n\n");
                        joined.push_str(&text);
                    }
                    _ => turns.push((role, text)),
                }
            }
        }
    }

    if matches!(turns.last(), Some((Role::Assistant, _))) {
        turns.push((Role::User, CONTINUATION_PROMPT.to_string()));
    }

    let mut out = Vec::with_capacity(turns.len() + 1);
    if !system.is_empty() {
        out.push(ChatMessage::text(Role::System, system.join("\n\n")));
    }
    out.extend(turns.into_iter().map(|(role, text)| ChatMessage {
        role,
        content: ChatContent::Text(text),
        tool_calls: None,
        tool_call_id: None,
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FunctionCall, ToolCall};

    fn roles(messages: &[ChatMessage]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn test_descriptor_lookup() {
        assert_eq!(find("reasoner").unwrap().kind, AgentKind::Escalating);
        assert_eq!(find(" tool ").unwrap().kind, AgentKind::Terminal);
        assert!(!find("coder").unwrap().tools_enabled);
        assert!(find("poet").is_none());
    }

    #[test]
    fn test_without_tools_flattens_calls_and_results() {
        let mut assistant = ChatMessage::text(Role::Assistant, "");
        assistant.tool_calls = Some(vec![ToolCall {
            id: "c1".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "read".to_string(),
                arguments: "{\"path\":\"a\"}".to_string(),
            },
        }]);
        let messages = vec![
            ChatMessage::text(Role::User, "open a"),
            assistant,
            ChatMessage::tool_result("c1", "contents"),
        ];

        let out = without_tools(&messages);
        assert_eq!(roles(&out), vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(out[1].content.as_text(), "[called read with {\"path\":\"a\"}]");
        assert!(out[1].tool_calls.is_none());
        assert_eq!(out[2].content.as_text(), "[tool result c1]\ncontents");
        assert!(out[2].tool_call_id.is_none());
    }

    #[test]
    fn test_alternation_merges_and_appends_continuation() {
        let messages = vec![
            ChatMessage::text(Role::System, "sys"),
            ChatMessage::text(Role::User, "a"),
            ChatMessage::text(Role::User, "b"),
            ChatMessage::text(Role::Assistant, "c"),
            ChatMessage::text(Role::Assistant, "d"),
        ];

        let out = alternate_roles(&messages);
        assert_eq!(
            roles(&out),
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(out[1].content.as_text(), "a\n\nb");
        assert_eq!(out[2].content.as_text(), "c\n\nd");
        assert_eq!(out[3].content.as_text(), CONTINUATION_PROMPT);
    }

    #[test]
    fn test_alternation_leaves_user_ending_alone() {
        let messages = vec![
            ChatMessage::text(Role::User, "a"),
            ChatMessage::text(Role::Assistant, "b"),
            ChatMessage::text(Role::User, "c"),
        ];
        let out = alternate_roles(&messages);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].content.as_text(), "c");
    }
}
