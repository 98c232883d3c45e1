use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of messages returned per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on a page of messages.
pub const MAX_PAGE_SIZE: usize = 100;

/// Account privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Author of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// bcrypt hash; never sent to clients.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub last_message_id: Option<i64>,
    pub last_msg_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row for a user's conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub last_msg_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A JSON document a user keeps across conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub user_id: String,
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything written when a conversation is created.
#[derive(Debug, Clone)]
pub struct NewConversation<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub name: &'a str,
    pub user_message: &'a str,
    pub user_at: DateTime<Utc>,
    pub reply: &'a str,
    pub reply_at: DateTime<Utc>,
}

/// Changes applied by a rename or pin request.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    /// New name; `None` or blank leaves the name unchanged.
    pub name: Option<String>,
    /// Move the conversation to the top of the listing.
    pub pin_to_top: bool,
}

/// Keyset cursor: return messages strictly older than this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

/// Page request for a conversation's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePage {
    pub limit: usize,
    pub before: Option<MessageCursor>,
}

impl MessagePage {
    /// Build a page, clamping `limit` into `1..=MAX_PAGE_SIZE`.
    ///
    /// A missing limit means [`DEFAULT_PAGE_SIZE`].
    pub fn new(limit: Option<i64>) -> Self {
        let limit = match limit {
            None => DEFAULT_PAGE_SIZE,
            Some(n) if n < 1 => 1,
            Some(n) => (n as usize).min(MAX_PAGE_SIZE),
        };
        Self {
            limit,
            before: None,
        }
    }

    pub fn before(mut self, cursor: MessageCursor) -> Self {
        self.before = Some(cursor);
        self
    }
}

impl Default for MessagePage {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limit_clamping() {
        assert_eq!(MessagePage::new(None).limit, 20);
        assert_eq!(MessagePage::new(Some(0)).limit, 1);
        assert_eq!(MessagePage::new(Some(-5)).limit, 1);
        assert_eq!(MessagePage::new(Some(50)).limit, 50);
        assert_eq!(MessagePage::new(Some(1000)).limit, 100);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::User, Role::Admin, Role::SuperAdmin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_user_hash_not_serialized() {
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            password_hash: "$2b$secret".into(),
            role: Role::User,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"role\":\"user\""));
    }
}
