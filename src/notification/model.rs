use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::chat::model::UserBrief;

/// How long a notification is kept before the TTL reaper may remove it
pub const NOTIFICATION_TTL_DAYS: i64 = 30;

/// Rolling window within which aggregatable events collapse
pub const AGGREGATION_WINDOW_HOURS: i64 = 24;

/// Notable event kinds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    StoryPublished,
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::StoryPublished => "story_published",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "follow" => Ok(NotificationKind::Follow),
            "like" => Ok(NotificationKind::Like),
            "comment" => Ok(NotificationKind::Comment),
            "story_published" => Ok(NotificationKind::StoryPublished),
            _ => Err(format!("Invalid notification kind: {}", value)),
        }
    }

    /// Whether repeated events of this kind fold into one row
    pub fn is_aggregatable(&self) -> bool {
        matches!(self, NotificationKind::Like | NotificationKind::Comment)
    }
}

/// What a notification points at.
///
/// Parsed case-insensitively and stored lowercase so an aggregation key
/// can never split on casing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Story,
    Comment,
    User,
}

impl TargetKind {
    pub fn as_str(&self) -> &str {
        match self {
            TargetKind::Story => "story",
            TargetKind::Comment => "comment",
            TargetKind::User => "user",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "story" => Ok(TargetKind::Story),
            "comment" => Ok(TargetKind::Comment),
            "user" => Ok(TargetKind::User),
            _ => Err(format!("Invalid target kind: {}", value)),
        }
    }
}

/// Tagged reference to the object a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationTarget {
    pub kind: TargetKind,
    pub id: i64,
}

/// Database model for a notification
#[derive(Debug, FromRow, Clone)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub kind: String,
    pub target_kind: String,
    pub target_id: i64,
    pub message: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_aggregated: bool,
    pub aggregated_count: i32,
    pub last_actors: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Inbound notable event from the engagement layer
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RecordEventRequest {
    #[schema(value_type = UuidWrapper)]
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub target: NotificationTarget,
}

/// Fully resolved notification for API responses and mailbox pushes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationResponse {
    pub id: i64,
    pub kind: NotificationKind,
    pub actor: UserBrief,
    pub target: NotificationTarget,
    pub message: String,
    pub is_read: bool,
    pub is_aggregated: bool,
    pub aggregated_count: i32,
    pub last_actors: Vec<UserBrief>,
    #[schema(value_type = DateTimeWrapper)]
    pub created_at: DateTime<Utc>,
}

/// Response for the notification list
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotificationsListResponse {
    pub notifications: Vec<NotificationResponse>,
    pub page: i64,
    pub unread_count: i64,
}

/// Unread badge count
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

/// Possible notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Notification not found")]
    NotFound,

    #[error("Actor not found")]
    ActorNotFound,

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Error response for the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotificationErrorResponse {
    pub error: String,
    pub code: String,
}

/// Render the human-readable summary for a notification.
///
/// `actor_names` is most-recent-first; `count` is the total folded events.
pub fn render_message(kind: NotificationKind, actor_names: &[String], count: i32) -> String {
    let lead = actor_names
        .first()
        .map(String::as_str)
        .unwrap_or("Someone");

    match kind {
        NotificationKind::Follow => format!("{} started following you", lead),
        NotificationKind::StoryPublished => format!("{} published a new story", lead),
        NotificationKind::Like => match count {
            1 => format!("{} liked your story", lead),
            2 => format!("{} and 1 other liked your story", lead),
            n => format!("{} and {} others liked your story", lead, n - 1),
        },
        NotificationKind::Comment => match count {
            1 => format!("{} commented on your story", lead),
            2 => format!("{} and 1 other commented on your story", lead),
            n => format!("{} and {} others commented on your story", lead, n - 1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_kind_normalizes_casing() {
        // The aggregation key must not split on casing
        assert_eq!(TargetKind::from_str("story").unwrap(), TargetKind::Story);
        assert_eq!(TargetKind::from_str("Story").unwrap(), TargetKind::Story);
        assert_eq!(TargetKind::from_str("STORY").unwrap(), TargetKind::Story);
        assert_eq!(TargetKind::from_str("User").unwrap(), TargetKind::User);
        assert!(TargetKind::from_str("post").is_err());

        assert_eq!(TargetKind::Story.as_str(), "story");
        assert_eq!(TargetKind::Comment.as_str(), "comment");
        assert_eq!(TargetKind::User.as_str(), "user");
    }

    #[test]
    fn test_kind_aggregatability() {
        assert!(NotificationKind::Like.is_aggregatable());
        assert!(NotificationKind::Comment.is_aggregatable());
        assert!(!NotificationKind::Follow.is_aggregatable());
        assert!(!NotificationKind::StoryPublished.is_aggregatable());
    }

    #[test]
    fn test_kind_round_trip() {
        for (s, k) in [
            ("follow", NotificationKind::Follow),
            ("like", NotificationKind::Like),
            ("comment", NotificationKind::Comment),
            ("story_published", NotificationKind::StoryPublished),
        ] {
            assert_eq!(NotificationKind::from_str(s).unwrap(), k);
            assert_eq!(k.as_str(), s);
        }
    }

    #[test]
    fn test_render_message_singular() {
        let names = vec!["Alice".to_string()];
        assert_eq!(
            render_message(NotificationKind::Like, &names, 1),
            "Alice liked your story"
        );
        assert_eq!(
            render_message(NotificationKind::Follow, &names, 1),
            "Alice started following you"
        );
        assert_eq!(
            render_message(NotificationKind::StoryPublished, &names, 1),
            "Alice published a new story"
        );
    }

    #[test]
    fn test_render_message_aggregated() {
        let names = vec!["Carol".to_string(), "Bob".to_string()];
        assert_eq!(
            render_message(NotificationKind::Like, &names, 2),
            "Carol and 1 other liked your story"
        );
        assert_eq!(
            render_message(NotificationKind::Comment, &names, 5),
            "Carol and 4 others commented on your story"
        );
    }

    #[test]
    fn test_render_message_no_actors() {
        assert_eq!(
            render_message(NotificationKind::Like, &[], 3),
            "Someone and 2 others liked your story"
        );
    }

    #[test]
    fn test_target_serialization() {
        let target = NotificationTarget {
            kind: TargetKind::Story,
            id: 42,
        };
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, r#"{"kind":"story","id":42}"#);

        let parsed: NotificationTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, target);
    }
}
