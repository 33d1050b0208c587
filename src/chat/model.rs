use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror;
use utoipa::ToSchema;
use uuid::Uuid;

/// Chat kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Private,
    Group,
}

impl ChatType {
    pub fn as_str(&self) -> &str {
        match self {
            ChatType::Private => "private",
            ChatType::Group => "group",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "private" => Ok(ChatType::Private),
            "group" => Ok(ChatType::Group),
            _ => Err(format!("Invalid chat type: {}", value)),
        }
    }
}

/// Participant role within a chat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Admin,
    Member,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &str {
        match self {
            ParticipantRole::Admin => "admin",
            ParticipantRole::Member => "member",
        }
    }
}

/// Database model for a chat
#[derive(Debug, FromRow, Clone)]
pub struct Chat {
    pub id: i64,
    pub chat_type: String,
    pub name: Option<String>,
    pub created_by: Uuid,
    pub last_message_id: Option<i64>,
    pub last_activity: DateTime<Utc>,
    pub message_count: i64,
    pub active_participants: i32,
    pub is_deleted: bool,
    pub private_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database model for a chat participant entry
#[derive(Debug, FromRow, Clone)]
pub struct ChatParticipant {
    pub chat_id: i64,
    pub user_id: Uuid,
    pub role: String,
    pub is_active: bool,
    pub can_post: bool,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Display fields for a user on outbound payloads
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserBrief {
    #[schema(value_type = UuidWrapper)]
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: String,
}

/// Participant entry in chat responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ParticipantInfo {
    pub user: UserBrief,
    pub role: ParticipantRole,
    #[schema(value_type = DateTimeWrapper)]
    pub joined_at: DateTime<Utc>,
}

/// Last-message preview on chat list entries
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LastMessagePreview {
    pub id: i64,
    pub content: String,
    pub sender_name: String,
    #[schema(value_type = DateTimeWrapper)]
    pub created_at: DateTime<Utc>,
}

/// Request to create a group chat
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateGroupChatRequest {
    /// Display name for the group
    #[schema(example = "Writers' room")]
    pub name: String,

    /// Initial members (the creator is added as admin automatically)
    pub member_ids: Vec<Uuid>,
}

/// Request to open (or fetch) a private chat with another user
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreatePrivateChatRequest {
    #[schema(value_type = UuidWrapper)]
    pub user_id: Uuid,
}

/// Response format for a single chat
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub id: i64,
    pub chat_type: ChatType,
    pub name: Option<String>,
    pub participants: Vec<ParticipantInfo>,
    pub last_message: Option<LastMessagePreview>,
    #[schema(value_type = DateTimeWrapper)]
    pub last_activity: DateTime<Utc>,
    pub message_count: i64,
    /// Unread count for the requesting user
    pub unread_count: i64,
}

/// Response for the chat list
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatsListResponse {
    pub chats: Vec<ChatResponse>,
    pub page: i64,
}

/// Possible chat errors
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Chat not found")]
    NotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Not a participant of this chat")]
    NotAParticipant,

    #[error("Only chat admins can perform this action")]
    AdminRequired,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response for the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatErrorResponse {
    /// Error message
    #[schema(example = "Chat not found")]
    pub error: String,

    /// Error code
    #[schema(example = "NOT_FOUND")]
    pub code: String,
}

/// Canonical key for the unordered pair of users in a private chat.
///
/// Order-independent so the unique index can enforce the one-private-chat
/// invariant.
pub fn private_pair_key(a: &Uuid, b: &Uuid) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_pair_key_is_order_independent() {
        let a = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let b = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();

        assert_eq!(private_pair_key(&a, &b), private_pair_key(&b, &a));
        assert_eq!(
            private_pair_key(&a, &b),
            format!("{}:{}", a, b),
            "lower UUID sorts first"
        );
    }

    #[test]
    fn test_private_pair_key_same_user() {
        let a = Uuid::new_v4();
        assert_eq!(private_pair_key(&a, &a), format!("{}:{}", a, a));
    }

    #[test]
    fn test_chat_type_round_trip() {
        assert_eq!(ChatType::from_str("private").unwrap(), ChatType::Private);
        assert_eq!(ChatType::from_str("GROUP").unwrap(), ChatType::Group);
        assert!(ChatType::from_str("channel").is_err());
        assert_eq!(ChatType::Private.as_str(), "private");
        assert_eq!(ChatType::Group.as_str(), "group");
    }
}
