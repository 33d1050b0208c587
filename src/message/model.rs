use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::chat::model::UserBrief;

/// Maximum message content length after trimming
pub const MAX_CONTENT_LENGTH: usize = 2000;

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
            MessageType::System => "system",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "audio" => Ok(MessageType::Audio),
            "video" => Ok(MessageType::Video),
            "system" => Ok(MessageType::System),
            _ => Err(format!("Invalid message type: {}", value)),
        }
    }
}

/// Database model for a message
#[derive(Debug, FromRow, Clone)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub reply_to: Option<i64>,
    pub is_deleted: bool,
    pub deleted_by: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attachment payload, same shape inbound and outbound
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Attachment {
    pub kind: String,
    pub url: String,
    pub filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
}

/// Request to send a message
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SendMessageRequest {
    /// Message body, trimmed server-side
    #[schema(example = "Hello!")]
    pub content: String,

    #[serde(default)]
    pub message_type: MessageType,

    /// Message being replied to; must belong to the same chat
    #[serde(default)]
    pub reply_to: Option<i64>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Quoted message on replies
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplyPreview {
    pub id: i64,
    pub content: String,
    pub sender_name: String,
}

/// A single reaction entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ReactionEntry {
    #[schema(value_type = UuidWrapper)]
    pub user_id: Uuid,
    pub emoji: String,
}

/// Aggregated per-emoji reaction count
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: i64,
}

/// Fully resolved message for broadcast and API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    pub chat_id: i64,
    pub content: String,
    pub message_type: MessageType,
    pub sender: UserBrief,
    pub reply_to: Option<ReplyPreview>,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<ReactionEntry>,
    pub is_edited: bool,
    #[schema(value_type = DateTimeWrapper)]
    pub created_at: DateTime<Utc>,
}

/// Lightweight payload pushed to offline participants
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessagePreview {
    pub content: String,
    pub sender: String,
    pub chat_name: Option<String>,
}

/// Response for paginated message history (newest first)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessagesListResponse {
    pub messages: Vec<MessageResponse>,
    pub page: i64,
}

/// Possible message errors
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Message not found")]
    NotFound,

    #[error("Chat not found")]
    ChatNotFound,

    #[error("Not a participant of this chat")]
    NotAParticipant,

    #[error("Not authorized to perform this action")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response for the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<crate::chat::model::ChatError> for MessageError {
    fn from(err: crate::chat::model::ChatError) -> Self {
        use crate::chat::model::ChatError;
        match err {
            ChatError::DatabaseError(e) => MessageError::DatabaseError(e),
            ChatError::CacheError(e) => MessageError::CacheError(e),
            ChatError::NotFound => MessageError::ChatNotFound,
            ChatError::UserNotFound => MessageError::ChatNotFound,
            ChatError::NotAParticipant => MessageError::NotAParticipant,
            ChatError::AdminRequired => MessageError::Unauthorized,
            ChatError::ValidationError(msg) => MessageError::ValidationError(msg),
            ChatError::InternalError(msg) => MessageError::InternalError(msg),
        }
    }
}

/// Validate and normalize message content.
///
/// Content must be non-empty after trimming and at most
/// MAX_CONTENT_LENGTH characters.
pub fn validate_content(content: &str) -> Result<String, MessageError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(MessageError::ValidationError(
            "Message content cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_CONTENT_LENGTH {
        return Err(MessageError::ValidationError(format!(
            "Message content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Recompute per-emoji counts from the raw reaction entries.
pub fn reaction_counts(entries: &[ReactionEntry]) -> Vec<ReactionCount> {
    let mut counts: Vec<ReactionCount> = Vec::new();
    for entry in entries {
        match counts.iter_mut().find(|c| c.emoji == entry.emoji) {
            Some(count) => count.count += 1,
            None => counts.push(ReactionCount {
                emoji: entry.emoji.clone(),
                count: 1,
            }),
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_trims() {
        assert_eq!(validate_content("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn test_validate_content_rejects_empty() {
        assert!(validate_content("").is_err());
        assert!(validate_content("   ").is_err());
        assert!(validate_content("\n\t").is_err());
    }

    #[test]
    fn test_validate_content_rejects_over_length() {
        let long = "x".repeat(MAX_CONTENT_LENGTH + 1);
        assert!(validate_content(&long).is_err());

        let exactly = "x".repeat(MAX_CONTENT_LENGTH);
        assert_eq!(validate_content(&exactly).unwrap().len(), MAX_CONTENT_LENGTH);
    }

    #[test]
    fn test_message_type_round_trip() {
        for (s, t) in [
            ("text", MessageType::Text),
            ("image", MessageType::Image),
            ("file", MessageType::File),
            ("audio", MessageType::Audio),
            ("video", MessageType::Video),
            ("system", MessageType::System),
        ] {
            assert_eq!(MessageType::from_str(s).unwrap(), t);
            assert_eq!(t.as_str(), s);
        }
        assert!(MessageType::from_str("gif").is_err());
    }

    #[test]
    fn test_message_type_default_is_text() {
        assert_eq!(MessageType::default(), MessageType::Text);
    }

    #[test]
    fn test_reaction_counts_grouping() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let entries = vec![
            ReactionEntry {
                user_id: a,
                emoji: "🔥".to_string(),
            },
            ReactionEntry {
                user_id: b,
                emoji: "🔥".to_string(),
            },
            ReactionEntry {
                user_id: a,
                emoji: "❤️".to_string(),
            },
        ];

        let counts = reaction_counts(&entries);
        assert_eq!(counts.len(), 2);
        assert_eq!(
            counts.iter().find(|c| c.emoji == "🔥").unwrap().count,
            2
        );
        assert_eq!(
            counts.iter().find(|c| c.emoji == "❤️").unwrap().count,
            1
        );
    }

    #[test]
    fn test_send_message_request_defaults() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"content": "hi"}"#).expect("minimal request should parse");
        assert_eq!(req.message_type, MessageType::Text);
        assert!(req.reply_to.is_none());
        assert!(req.attachments.is_empty());
    }
}
