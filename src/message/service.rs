use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::redis::RedisCache;
use crate::chat::model::UserBrief;
use crate::chat::service::ChatService;
use crate::message::model::{
    reaction_counts, validate_content, Attachment, Message, MessageError, MessagePreview,
    MessageResponse, MessageType, ReactionCount, ReactionEntry, ReplyPreview, SendMessageRequest,
};
use crate::presence::store::PresenceStore;
use crate::websocket::events::ServerEvent;
use crate::websocket::fanout::{Broadcaster, ConnId};

const MESSAGES_PER_PAGE: i64 = 50;
const MAX_EMOJI_LENGTH: usize = 8;

pub struct MessageService {
    pool: PgPool,
    redis_cache: Option<RedisCache>,
    chat_service: Arc<ChatService>,
    presence: Arc<PresenceStore>,
    fanout: Arc<dyn Broadcaster>,
    // Per-chat sequencers: broadcasts leave in persistence-commit order
    send_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl MessageService {
    pub fn new(
        pool: PgPool,
        redis_cache: Option<RedisCache>,
        chat_service: Arc<ChatService>,
        presence: Arc<PresenceStore>,
        fanout: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            pool,
            redis_cache,
            chat_service,
            presence,
            fanout,
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    fn chat_sequencer(&self, chat_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.send_locks.lock().expect("sequencer lock poisoned");
        locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // Flood guard via Redis; skipped when Redis is not configured
    async fn check_flood(&self, user_id: &Uuid) -> Result<(), MessageError> {
        if let Some(cache) = &self.redis_cache {
            match cache.check_message_flood(user_id).await {
                Ok(true) => return Err(MessageError::RateLimitExceeded),
                Ok(false) => {}
                Err(e) => {
                    // Storage pressure must not block sends
                    warn!("Flood guard unavailable: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Ingest a send-request into a persisted, fully resolved message.
    ///
    /// Validation and membership run before any write; the per-chat
    /// sequencer is held across insert, rollup, and broadcast so room
    /// delivery order equals persistence-commit order.
    pub async fn send_message(
        &self,
        chat_id: i64,
        sender_id: &Uuid,
        request: SendMessageRequest,
    ) -> Result<MessageResponse, MessageError> {
        let content = validate_content(&request.content)?;

        self.check_flood(sender_id).await?;

        if !self.chat_service.can_post(sender_id, chat_id).await? {
            return Err(MessageError::NotAParticipant);
        }

        let chat = self.chat_service.find_chat_by_id(chat_id).await?;

        // A reply must quote a message from the same chat; anything else
        // is dropped silently
        let reply_to = match request.reply_to {
            Some(reply_id) => self
                .find_message(reply_id)
                .await?
                .filter(|m| m.chat_id == chat_id && !m.is_deleted)
                .map(|m| m.id),
            None => None,
        };

        let sequencer = self.chat_sequencer(chat_id);
        let _guard = sequencer.lock().await;

        let now = Utc::now();
        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO chat.messages
                (chat_id, sender_id, content, message_type, reply_to, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(chat_id)
        .bind(sender_id)
        .bind(&content)
        .bind(request.message_type.as_str())
        .bind(reply_to)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert message: {}", e);
            MessageError::DatabaseError(e)
        })?;

        for attachment in &request.attachments {
            if let Err(e) = sqlx::query(
                r#"
                INSERT INTO chat.message_attachments
                    (message_id, kind, url, filename, size_bytes, mime_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(message.id)
            .bind(&attachment.kind)
            .bind(&attachment.url)
            .bind(&attachment.filename)
            .bind(attachment.size_bytes)
            .bind(&attachment.mime_type)
            .execute(&self.pool)
            .await
            {
                error!("Failed to persist attachment for message {}: {}", message.id, e);
            }
        }

        // Atomic rollup; a failure here leaves the message in place and
        // is logged loudly rather than rolled back, because the message
        // is about to be delivered
        let rollup = sqlx::query(
            r#"
            UPDATE chat.chats
            SET last_message_id = $2, last_activity = $3,
                message_count = message_count + 1, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(chat_id)
        .bind(message.id)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(e) = rollup {
            error!(
                "Chat rollup update failed for chat {} after message {} was written: {}",
                chat_id, message.id, e
            );
        }

        let response = self.build_message_response(&message).await?;

        self.fanout.broadcast_room(
            chat_id,
            &ServerEvent::NewMessage {
                message: response.clone(),
            },
            None,
        );

        // Mailbox notification for participants with no live connection
        let participant_ids = self.chat_service.active_participant_ids(chat_id).await?;
        let preview = MessagePreview {
            content: content.clone(),
            sender: response.sender.name.clone(),
            chat_name: chat.name.clone(),
        };
        for participant in &participant_ids {
            if participant == sender_id || self.presence.is_online(participant) {
                continue;
            }
            self.fanout.send_user(
                participant,
                &ServerEvent::NewMessageNotification {
                    chat_id,
                    message: preview.clone(),
                },
            );
        }

        drop(_guard);

        self.chat_service.invalidate_chat_lists(&participant_ids).await;

        info!("Message {} sent to chat {}", message.id, chat_id);
        Ok(response)
    }

    /// Paginated message history, newest first.
    pub async fn get_chat_messages(
        &self,
        chat_id: i64,
        user_id: &Uuid,
        page: Option<i64>,
    ) -> Result<Vec<MessageResponse>, MessageError> {
        if !self.chat_service.can_join(user_id, chat_id).await? {
            return Err(MessageError::NotAParticipant);
        }

        let page = page.unwrap_or(1).max(1);
        let offset = (page - 1) * MESSAGES_PER_PAGE;

        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM chat.messages
            WHERE chat_id = $1 AND is_deleted = false
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(chat_id)
        .bind(MESSAGES_PER_PAGE)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        let mut responses = Vec::with_capacity(messages.len());
        for message in &messages {
            responses.push(self.build_message_response(message).await?);
        }

        Ok(responses)
    }

    /// Add (or refresh) a reaction; one row per (message, user, emoji).
    pub async fn add_reaction(
        &self,
        message_id: i64,
        user_id: &Uuid,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, MessageError> {
        let emoji = validate_emoji(emoji)?;
        let message = self.require_message(message_id).await?;

        if !self.chat_service.can_post(user_id, message.chat_id).await? {
            return Err(MessageError::NotAParticipant);
        }

        // Re-adding the same emoji replaces the row rather than
        // duplicating it
        sqlx::query(
            r#"
            INSERT INTO chat.message_reactions (message_id, user_id, emoji, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id, emoji)
            DO UPDATE SET created_at = EXCLUDED.created_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(&emoji)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        let counts = self.reaction_counts_for(message_id).await?;
        let user = self.resolve_sender(user_id).await?;

        self.fanout.broadcast_room(
            message.chat_id,
            &ServerEvent::MessageReactionAdded {
                message_id,
                user_id: *user_id,
                user_name: user.name,
                emoji,
                reaction_counts: counts.clone(),
            },
            None,
        );

        Ok(counts)
    }

    /// Remove a (user, emoji) reaction; a missing row is a no-op.
    pub async fn remove_reaction(
        &self,
        message_id: i64,
        user_id: &Uuid,
        emoji: &str,
    ) -> Result<Vec<ReactionCount>, MessageError> {
        let emoji = validate_emoji(emoji)?;
        let message = self.require_message(message_id).await?;

        if !self.chat_service.can_post(user_id, message.chat_id).await? {
            return Err(MessageError::NotAParticipant);
        }

        let result = sqlx::query(
            "DELETE FROM chat.message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(&emoji)
        .execute(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        let counts = self.reaction_counts_for(message_id).await?;

        if result.rows_affected() > 0 {
            let user = self.resolve_sender(user_id).await?;
            self.fanout.broadcast_room(
                message.chat_id,
                &ServerEvent::MessageReactionRemoved {
                    message_id,
                    user_id: *user_id,
                    user_name: user.name,
                    emoji,
                    reaction_counts: counts.clone(),
                },
                None,
            );
        }

        Ok(counts)
    }

    /// Mark every unread message in a chat as read for a user.
    ///
    /// Idempotent: the insert skips rows that already exist, so calling
    /// twice yields the same ledger state.
    pub async fn mark_messages_read(
        &self,
        chat_id: i64,
        user_id: &Uuid,
        origin: Option<ConnId>,
    ) -> Result<i64, MessageError> {
        if !self.chat_service.can_join(user_id, chat_id).await? {
            return Err(MessageError::NotAParticipant);
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO chat.message_reads (message_id, user_id, read_at)
            SELECT m.id, $2, $3 FROM chat.messages m
            WHERE m.chat_id = $1 AND m.sender_id <> $2 AND m.is_deleted = false
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        // Coarse watermark hint on the participant entry; best-effort
        if let Err(e) = sqlx::query(
            "UPDATE chat.chat_participants SET last_read_at = $3 WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        {
            error!("Failed to update read watermark for chat {}: {}", chat_id, e);
        }

        let user = self.resolve_sender(user_id).await?;
        self.fanout.broadcast_room(
            chat_id,
            &ServerEvent::MessagesRead {
                user_id: *user_id,
                user_name: user.name,
                chat_id,
            },
            origin,
        );

        Ok(result.rows_affected() as i64)
    }

    /// Unread count for (chat, user); same formula the chat list uses.
    pub async fn unread_count(&self, chat_id: i64, user_id: &Uuid) -> Result<i64, MessageError> {
        Ok(self.chat_service.unread_count(chat_id, user_id).await?)
    }

    /// Soft delete a message; sender or a chat admin.
    pub async fn delete_message(
        &self,
        message_id: i64,
        user_id: &Uuid,
    ) -> Result<i64, MessageError> {
        let message = self.require_message(message_id).await?;

        if message.sender_id != *user_id {
            let is_chat_admin = self
                .chat_service
                .find_active_participant(message.chat_id, user_id)
                .await?
                .map_or(false, |p| p.role == "admin");
            if !is_chat_admin {
                return Err(MessageError::Unauthorized);
            }
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE chat.messages
            SET is_deleted = true, deleted_by = $2, deleted_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        // Keep the rollup in step; floored so concurrent deletes cannot
        // drive it negative
        if let Err(e) = sqlx::query(
            r#"
            UPDATE chat.chats
            SET message_count = GREATEST(message_count - 1, 0), updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(message.chat_id)
        .bind(now)
        .execute(&self.pool)
        .await
        {
            error!(
                "Rollup decrement failed for chat {} after deleting message {}: {}",
                message.chat_id, message_id, e
            );
        }

        match self.chat_service.active_participant_ids(message.chat_id).await {
            Ok(ids) => self.chat_service.invalidate_chat_lists(&ids).await,
            Err(e) => error!("Failed to list participants for cache invalidation: {}", e),
        }

        info!("Message {} deleted by user {}", message_id, user_id);
        Ok(message_id)
    }

    async fn find_message(&self, message_id: i64) -> Result<Option<Message>, MessageError> {
        sqlx::query_as::<_, Message>("SELECT * FROM chat.messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MessageError::DatabaseError)
    }

    async fn require_message(&self, message_id: i64) -> Result<Message, MessageError> {
        self.find_message(message_id)
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or(MessageError::NotFound)
    }

    async fn resolve_sender(&self, user_id: &Uuid) -> Result<UserBrief, MessageError> {
        Ok(self.chat_service.resolve_user_brief(user_id).await?)
    }

    async fn reaction_counts_for(
        &self,
        message_id: i64,
    ) -> Result<Vec<ReactionCount>, MessageError> {
        let entries = sqlx::query_as::<_, ReactionEntry>(
            "SELECT user_id, emoji FROM chat.message_reactions WHERE message_id = $1 ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        Ok(reaction_counts(&entries))
    }

    async fn build_message_response(
        &self,
        message: &Message,
    ) -> Result<MessageResponse, MessageError> {
        let sender = self.resolve_sender(&message.sender_id).await?;

        let reply_to = match message.reply_to {
            Some(reply_id) => sqlx::query(
                r#"
                SELECT m.id, m.content, u.display_name AS sender_name
                FROM chat.messages m
                JOIN chat.users u ON u.id = m.sender_id
                WHERE m.id = $1
                "#,
            )
            .bind(reply_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MessageError::DatabaseError)?
            .map(|row| ReplyPreview {
                id: row.get("id"),
                content: row.get("content"),
                sender_name: row.get("sender_name"),
            }),
            None => None,
        };

        let attachments = sqlx::query(
            r#"
            SELECT kind, url, filename, size_bytes, mime_type
            FROM chat.message_attachments WHERE message_id = $1 ORDER BY id ASC
            "#,
        )
        .bind(message.id)
        .fetch_all(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?
        .iter()
        .map(|row| Attachment {
            kind: row.get("kind"),
            url: row.get("url"),
            filename: row.get("filename"),
            size_bytes: row.get("size_bytes"),
            mime_type: row.get("mime_type"),
        })
        .collect();

        let reactions = sqlx::query_as::<_, ReactionEntry>(
            "SELECT user_id, emoji FROM chat.message_reactions WHERE message_id = $1 ORDER BY created_at ASC",
        )
        .bind(message.id)
        .fetch_all(&self.pool)
        .await
        .map_err(MessageError::DatabaseError)?;

        let message_type = MessageType::from_str(&message.message_type)
            .map_err(MessageError::InternalError)?;

        Ok(MessageResponse {
            id: message.id,
            chat_id: message.chat_id,
            content: message.content.clone(),
            message_type,
            sender,
            reply_to,
            attachments,
            reactions,
            is_edited: message.is_edited,
            created_at: message.created_at,
        })
    }
}

fn validate_emoji(emoji: &str) -> Result<String, MessageError> {
    let trimmed = emoji.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_EMOJI_LENGTH {
        return Err(MessageError::ValidationError(
            "Invalid reaction emoji".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::fanout::MockBroadcaster;
    use sqlx::postgres::PgPoolOptions;

    fn unreachable_pool() -> PgPool {
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_millis(100))
            .connect_lazy("postgres://unreachable-host/none")
            .expect("lazy pool construction should not connect")
    }

    fn service_with_mock(fanout: MockBroadcaster) -> MessageService {
        let pool = unreachable_pool();
        let chat_service = Arc::new(ChatService::new(pool.clone(), None));
        MessageService::new(
            pool,
            None,
            chat_service,
            Arc::new(PresenceStore::new()),
            Arc::new(fanout),
        )
    }

    #[test]
    fn test_validate_emoji() {
        assert_eq!(validate_emoji("🔥").unwrap(), "🔥");
        assert_eq!(validate_emoji(" 👍 ").unwrap(), "👍");
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("   ").is_err());
        assert!(validate_emoji("way too long for an emoji").is_err());
    }

    #[tokio::test]
    async fn test_invalid_content_rejected_before_any_write_or_broadcast() {
        // The mock panics on any call, so the assertion is that no
        // broadcast happens for a validation failure
        let fanout = MockBroadcaster::new();
        let service = service_with_mock(fanout);

        let result = service
            .send_message(
                1,
                &Uuid::new_v4(),
                SendMessageRequest {
                    content: "   ".to_string(),
                    message_type: MessageType::Text,
                    reply_to: None,
                    attachments: vec![],
                },
            )
            .await;

        assert!(matches!(result, Err(MessageError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_persistence_failure_prevents_broadcast() {
        // With an unreachable database the membership check fails, the
        // send errors, and nothing is broadcast
        let fanout = MockBroadcaster::new();
        let service = service_with_mock(fanout);

        let result = service
            .send_message(
                1,
                &Uuid::new_v4(),
                SendMessageRequest {
                    content: "hello".to_string(),
                    message_type: MessageType::Text,
                    reply_to: None,
                    attachments: vec![],
                },
            )
            .await;

        assert!(matches!(result, Err(MessageError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_sequencer_is_shared_per_chat() {
        let service = service_with_mock(MockBroadcaster::new());

        let a = service.chat_sequencer(7);
        let b = service.chat_sequencer(7);
        let other = service.chat_sequencer(8);

        assert!(Arc::ptr_eq(&a, &b), "same chat shares one sequencer");
        assert!(!Arc::ptr_eq(&a, &other), "chats are sequenced independently");
    }
}
