use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::model::{
    MessagePreview, MessageResponse, MessageType, ReactionCount, SendMessageRequest,
};
use crate::notification::model::NotificationResponse;

/// Events a client may send over the socket
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinChat {
        chat_id: i64,
    },
    LeaveChat {
        chat_id: i64,
    },
    SendMessage {
        chat_id: i64,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        reply_to: Option<i64>,
        #[serde(default)]
        attachments: Vec<crate::message::model::Attachment>,
    },
    TypingStart {
        chat_id: i64,
    },
    TypingStop {
        chat_id: i64,
    },
    AddReaction {
        message_id: i64,
        emoji: String,
    },
    RemoveReaction {
        message_id: i64,
        emoji: String,
    },
    MarkMessagesRead {
        chat_id: i64,
    },
}

impl ClientEvent {
    /// Extract the send-message payload as a service request.
    pub fn into_send_request(self) -> Option<(i64, SendMessageRequest)> {
        match self {
            ClientEvent::SendMessage {
                chat_id,
                content,
                message_type,
                reply_to,
                attachments,
            } => Some((
                chat_id,
                SendMessageRequest {
                    content,
                    message_type,
                    reply_to,
                    attachments,
                },
            )),
            _ => None,
        }
    }
}

/// Events the server emits to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    JoinedChat {
        chat_id: i64,
    },
    LeftChat {
        chat_id: i64,
    },
    Error {
        message: String,
    },
    NewMessage {
        message: MessageResponse,
    },
    NewMessageNotification {
        chat_id: i64,
        message: MessagePreview,
    },
    UserTyping {
        user_id: Uuid,
        user_name: String,
        chat_id: i64,
    },
    UserStopTyping {
        user_id: Uuid,
        user_name: String,
        chat_id: i64,
    },
    MessageReactionAdded {
        message_id: i64,
        user_id: Uuid,
        user_name: String,
        emoji: String,
        reaction_counts: Vec<ReactionCount>,
    },
    MessageReactionRemoved {
        message_id: i64,
        user_id: Uuid,
        user_name: String,
        emoji: String,
        reaction_counts: Vec<ReactionCount>,
    },
    MessagesRead {
        user_id: Uuid,
        user_name: String,
        chat_id: i64,
    },
    UserStatusChange {
        user_id: Uuid,
        is_online: bool,
        last_seen: DateTime<Utc>,
    },
    NewNotification {
        notification: NotificationResponse,
        unread_count: i64,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Serialize for the wire; events are plain JSON text frames.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Serialization of these enums cannot fail in practice
            format!(r#"{{"type":"error","message":"serialization failure: {}"}}"#, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parsing() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type": "join_chat", "chat_id": 7}"#).unwrap();
        match event {
            ClientEvent::JoinChat { chat_id } => assert_eq!(chat_id, 7),
            _ => panic!("Expected JoinChat"),
        }

        let event: ClientEvent =
            serde_json::from_str(r#"{"type": "send_message", "chat_id": 7, "content": "hi"}"#)
                .unwrap();
        let (chat_id, req) = event.into_send_request().unwrap();
        assert_eq!(chat_id, 7);
        assert_eq!(req.content, "hi");
        assert_eq!(req.message_type, MessageType::Text);

        let event: ClientEvent =
            serde_json::from_str(r#"{"type": "add_reaction", "message_id": 3, "emoji": "🔥"}"#)
                .unwrap();
        match event {
            ClientEvent::AddReaction { message_id, emoji } => {
                assert_eq!(message_id, 3);
                assert_eq!(emoji, "🔥");
            }
            _ => panic!("Expected AddReaction"),
        }
    }

    #[test]
    fn test_unknown_client_event_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type": "drop_tables", "chat_id": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::JoinedChat { chat_id: 12 };
        let json = event.to_json();
        assert!(json.contains(r#""type":"joined_chat"#));
        assert!(json.contains(r#""chat_id":12"#));

        let event = ServerEvent::error("nope");
        let json = event.to_json();
        assert!(json.contains(r#""type":"error"#));
        assert!(json.contains(r#""message":"nope"#));
    }

    #[test]
    fn test_status_change_serialization() {
        let event = ServerEvent::UserStatusChange {
            user_id: Uuid::nil(),
            is_online: false,
            last_seen: chrono::Utc::now(),
        };
        let json = event.to_json();
        assert!(json.contains(r#""type":"user_status_change"#));
        assert!(json.contains(r#""is_online":false"#));
    }

    #[test]
    fn test_typing_event_serialization() {
        let event = ServerEvent::UserTyping {
            user_id: Uuid::nil(),
            user_name: "ann".to_string(),
            chat_id: 5,
        };
        let json = event.to_json();
        assert!(json.contains(r#""type":"user_typing"#));
        assert!(json.contains(r#""user_name":"ann"#));
        assert!(json.contains(r#""chat_id":5"#));
    }
}
