//! Chat message types persisted in the session log.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the session's message log.
///
/// `content` is mutable only while the message is the trailing assistant
/// message of an active generation; `ts` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// RFC3339 UTC creation time.
    pub ts: String,
    /// True only for an assistant message whose content is still streaming.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_loading: bool,
    /// Conversation-window id this message belongs to.
    pub session_id: u32,
}

impl Message {
    /// Creates a user message stamped with the current time.
    pub fn user(content: impl Into<String>, session_id: u32) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ts: timestamp(),
            is_loading: false,
            session_id,
        }
    }

    /// Creates a finished assistant message.
    pub fn assistant(content: impl Into<String>, session_id: u32) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            ts: timestamp(),
            is_loading: false,
            session_id,
        }
    }

    /// Creates the empty streaming placeholder appended on submission.
    pub fn loading(session_id: u32) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            ts: timestamp(),
            is_loading: true,
            session_id,
        }
    }
}

/// Returns an RFC3339 UTC timestamp string.
fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = Message::user("hello", 42);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);

        // is_loading is omitted when false and defaults back to false
        assert!(!json.contains("is_loading"));
    }

    #[test]
    fn test_loading_placeholder_roundtrip() {
        let msg = Message::loading(7);
        assert!(msg.is_loading);
        assert!(msg.content.is_empty());
        assert_eq!(msg.role, Role::Assistant);

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"is_loading\":true"));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }
}
