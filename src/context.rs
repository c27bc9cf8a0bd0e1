//! Evaluation context assembly for guardrail checks.
//!
//! A [`ConversationContext`] is the serialized window of messages handed to
//! a classification call. It is a derived value, built fresh per check from
//! the live message history, never stored independently.

use serde::Serialize;

use crate::message::{Message, Role};

/// The conversation window submitted to a classification call.
///
/// Holds the conversation id, an optional assistant system prompt (prepended
/// so the classifier sees the same framing the agent does), and the message
/// window — optionally extended with a drafted assistant reply when the
/// assistant side of the turn is being evaluated.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    conversation_id: String,
    system_prompt: Option<String>,
    messages: Vec<Message>,
}

impl ConversationContext {
    /// Build a context from the conversation id and the current history.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, messages: &[Message]) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            system_prompt: None,
            messages: messages.to_vec(),
        }
    }

    /// Prepend the assistant's system prompt to the evaluated window.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Append a drafted assistant reply to the evaluated window.
    ///
    /// Used for the assistant-side check: the draft is part of the context
    /// the classifier evaluates, but it is not yet part of visible history.
    #[must_use]
    pub fn with_draft_reply(mut self, draft: impl Into<String>) -> Self {
        self.messages.push(Message::assistant(draft));
        self
    }

    /// Returns the conversation id this context was built for.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Returns the message window, including any appended draft reply.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Serialize the context into the form the policy instructions expect.
    ///
    /// Produces an `<input>` wrapper around the pretty-printed conversation
    /// JSON, with the system prompt (when set) as the first message.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        let mut wire_messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            wire_messages.push(WireMessage {
                role: Role::System.as_str(),
                content: prompt,
            });
        }
        wire_messages.extend(self.messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let wire = WireConversation {
            id: &self.conversation_id,
            messages: wire_messages,
        };
        let json = serde_json::to_string_pretty(&wire).unwrap_or_else(|_| "{}".to_owned());
        format!("<input>\n{json}\n</input>")
    }
}

#[derive(Serialize)]
struct WireConversation<'a> {
    id: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_wraps_conversation_json() {
        let history = vec![Message::user("hello")];
        let context = ConversationContext::new("conv-1", &history);
        let prompt = context.to_prompt();

        assert!(prompt.starts_with("<input>\n"));
        assert!(prompt.ends_with("\n</input>"));
        assert!(prompt.contains("\"id\": \"conv-1\""));
        assert!(prompt.contains("\"content\": \"hello\""));
    }

    #[test]
    fn test_system_prompt_comes_first() {
        let history = vec![Message::user("hi")];
        let context =
            ConversationContext::new("conv-2", &history).with_system_prompt("be helpful");
        let prompt = context.to_prompt();

        let system_pos = prompt.find("be helpful").unwrap();
        let user_pos = prompt.find("hi").unwrap();
        assert!(system_pos < user_pos);
    }

    #[test]
    fn test_draft_reply_is_appended_as_assistant() {
        let history = vec![Message::user("what's the weather")];
        let context =
            ConversationContext::new("conv-3", &history).with_draft_reply("It's sunny");

        let last = context.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "It's sunny");
        assert!(context.to_prompt().contains("It's sunny"));
    }
}
