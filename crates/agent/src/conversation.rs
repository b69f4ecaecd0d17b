//! Rolling message log spanning one agent run.
//!
//! The system prompt is held by the agent and prepended on every
//! inference; the conversation itself only stores user/assistant turns
//! and prunes from the oldest pair when it outgrows its bound.

use crate::model::Message;

pub struct Conversation {
    messages: Vec<Message>,
    max_messages: usize,
}

impl Conversation {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(2),
        }
    }

    pub fn push_user(&mut self, message: Message) {
        debug_assert!(matches!(message, Message::User { .. }));
        self.messages.push(message);
        self.prune();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimated_tokens).sum()
    }

    fn prune(&mut self) {
        while self.messages.len() > self.max_messages {
            // Drop the oldest user/assistant pair together so the log
            // never starts with a dangling assistant turn.
            let take = if self.messages.len() >= 2 { 2 } else { 1 };
            self.messages.drain(0..take);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    #[test]
    fn prunes_oldest_pair_beyond_bound() {
        let mut conversation = Conversation::new(4);
        for step in 0..4 {
            conversation.push_user(Message::user(format!("observation {step}")));
            conversation.push_assistant(format!("decision {step}"));
        }
        assert_eq!(conversation.len(), 4);
        match &conversation.messages()[0] {
            Message::User { .. } => {}
            other => panic!("log must start with a user turn, got {other:?}"),
        }
        // The oldest surviving observation is from step 2.
        let text = serde_json::to_string(conversation.messages()).expect("serialize");
        assert!(!text.contains("observation 0"));
        assert!(!text.contains("observation 1"));
        assert!(text.contains("observation 2"));
    }

    #[test]
    fn token_estimate_accumulates() {
        let mut conversation = Conversation::new(10);
        conversation.push_user(Message::user("a".repeat(40)));
        conversation.push_assistant("b".repeat(40));
        assert_eq!(conversation.estimated_tokens(), 20);
    }
}
