use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of a conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only, chronological conversation history.
///
/// A completed exchange is always a user turn followed by exactly one
/// assistant turn. An exchange that fails midway is rolled back with
/// [`Conversation::rollback_user`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn::assistant(content));
    }

    /// Remove the trailing user turn of an exchange that never completed.
    ///
    /// Returns the removed turn, or `None` when the last turn is not a
    /// user turn (the history is left untouched).
    pub fn rollback_user(&mut self) -> Option<ChatTurn> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::User => self.turns.pop(),
            _ => None,
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Whether the last exchange is still waiting for its assistant turn
    pub fn awaiting_reply(&self) -> bool {
        matches!(self.turns.last(), Some(turn) if turn.role == Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_exchange() {
        let mut conversation = Conversation::new();
        conversation.push_user("hello");
        assert!(conversation.awaiting_reply());
        conversation.push_assistant("hi there");
        assert!(!conversation.awaiting_reply());

        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn test_rollback_only_removes_pending_user_turn() {
        let mut conversation = Conversation::new();
        conversation.push_user("first");
        conversation.push_assistant("reply");
        assert!(conversation.rollback_user().is_none());
        assert_eq!(conversation.len(), 2);

        conversation.push_user("second");
        let removed = conversation.rollback_user().unwrap();
        assert_eq!(removed.content, "second");
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::User.to_string(), "user");
    }
}
