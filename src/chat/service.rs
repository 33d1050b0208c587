use crate::cache::redis::RedisCache;
use crate::chat::model::{
    private_pair_key, Chat, ChatError, ChatParticipant, ChatResponse, ChatType,
    CreateGroupChatRequest, LastMessagePreview, ParticipantInfo, ParticipantRole, UserBrief,
};
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

const CHATS_PER_PAGE: i64 = 20;

#[derive(Clone)]
pub struct ChatService {
    pool: PgPool,
    redis_cache: Option<RedisCache>,
}

impl ChatService {
    pub fn new(pool: PgPool, redis_cache: Option<RedisCache>) -> Self {
        Self { pool, redis_cache }
    }

    /// Resolve display fields for outbound payloads.
    pub async fn resolve_user_brief(&self, user_id: &Uuid) -> Result<UserBrief, ChatError> {
        sqlx::query_as::<_, UserBrief>(
            r#"
            SELECT id, display_name AS name, avatar_url, role FROM chat.users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?
        .ok_or(ChatError::UserNotFound)
    }

    /// Fetch the active participant entry for a user, if any.
    pub async fn find_active_participant(
        &self,
        chat_id: i64,
        user_id: &Uuid,
    ) -> Result<Option<ChatParticipant>, ChatError> {
        let participant = sqlx::query_as::<_, ChatParticipant>(
            r#"
            SELECT p.* FROM chat.chat_participants p
            JOIN chat.chats c ON c.id = p.chat_id
            WHERE p.chat_id = $1 AND p.user_id = $2
              AND p.is_active = true AND c.is_deleted = false
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        Ok(participant)
    }

    /// Whether a user may join the room channel for a chat.
    ///
    /// Checked at operation time, never cached: participants can be
    /// removed mid-session.
    pub async fn can_join(&self, user_id: &Uuid, chat_id: i64) -> Result<bool, ChatError> {
        Ok(self.find_active_participant(chat_id, user_id).await?.is_some())
    }

    /// Whether a user may post (send, react, mark read) in a chat.
    ///
    /// Kept separate from can_join so permission granularity can grow
    /// without touching call sites.
    pub async fn can_post(&self, user_id: &Uuid, chat_id: i64) -> Result<bool, ChatError> {
        Ok(self
            .find_active_participant(chat_id, user_id)
            .await?
            .map_or(false, |p| p.can_post))
    }

    /// Active participant user ids for fanout decisions.
    pub async fn active_participant_ids(&self, chat_id: i64) -> Result<Vec<Uuid>, ChatError> {
        let rows = sqlx::query(
            "SELECT user_id FROM chat.chat_participants WHERE chat_id = $1 AND is_active = true",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        Ok(rows.iter().map(|row| row.get::<Uuid, _>("user_id")).collect())
    }

    pub async fn find_chat_by_id(&self, chat_id: i64) -> Result<Chat, ChatError> {
        sqlx::query_as::<_, Chat>(
            "SELECT * FROM chat.chats WHERE id = $1 AND is_deleted = false",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?
        .ok_or(ChatError::NotFound)
    }

    /// Get or create the private chat between two users.
    ///
    /// The partial unique index on the canonical pair key keeps this to
    /// one live chat per unordered pair even under concurrent creation.
    pub async fn get_or_create_private_chat(
        &self,
        creator: &Uuid,
        other: &Uuid,
    ) -> Result<ChatResponse, ChatError> {
        if creator == other {
            return Err(ChatError::ValidationError(
                "Cannot open a private chat with yourself".to_string(),
            ));
        }

        // Both sides must exist
        self.resolve_user_brief(other).await?;

        let pair_key = private_pair_key(creator, other);

        let existing = sqlx::query_as::<_, Chat>(
            r#"
            SELECT * FROM chat.chats
            WHERE chat_type = 'private' AND private_key = $1 AND is_deleted = false
            "#,
        )
        .bind(&pair_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        if let Some(chat) = existing {
            return self.build_chat_response(chat, creator).await;
        }

        let now = Utc::now();
        let inserted = sqlx::query_as::<_, Chat>(
            r#"
            INSERT INTO chat.chats
                (chat_type, created_by, last_activity, active_participants, private_key, created_at, updated_at)
            VALUES ('private', $1, $2, 2, $3, $2, $2)
            ON CONFLICT (private_key) WHERE chat_type = 'private' AND is_deleted = false
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(creator)
        .bind(now)
        .bind(&pair_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        let chat = match inserted {
            Some(chat) => {
                // Both sides of a private chat may administer it
                for user_id in [creator, other] {
                    sqlx::query(
                        r#"
                        INSERT INTO chat.chat_participants (chat_id, user_id, role, joined_at)
                        VALUES ($1, $2, 'admin', $3)
                        ON CONFLICT (chat_id, user_id) DO NOTHING
                        "#,
                    )
                    .bind(chat.id)
                    .bind(user_id)
                    .bind(now)
                    .execute(&self.pool)
                    .await
                    .map_err(ChatError::DatabaseError)?;
                }
                info!("Created private chat {} for pair {}", chat.id, pair_key);
                chat
            }
            None => {
                // Lost the race to a concurrent creator; use theirs
                sqlx::query_as::<_, Chat>(
                    r#"
                    SELECT * FROM chat.chats
                    WHERE chat_type = 'private' AND private_key = $1 AND is_deleted = false
                    "#,
                )
                .bind(&pair_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(ChatError::DatabaseError)?
                .ok_or_else(|| {
                    ChatError::InternalError("Private chat vanished mid-creation".to_string())
                })?
            }
        };

        self.invalidate_chat_lists(&[*creator, *other]).await;
        self.build_chat_response(chat, creator).await
    }

    /// Create a group chat with the creator as admin.
    pub async fn create_group_chat(
        &self,
        creator: &Uuid,
        request: CreateGroupChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ChatError::ValidationError(
                "Group name cannot be empty".to_string(),
            ));
        }

        let mut member_ids: Vec<Uuid> = request
            .member_ids
            .into_iter()
            .filter(|id| id != creator)
            .collect();
        member_ids.sort();
        member_ids.dedup();

        for member in &member_ids {
            self.resolve_user_brief(member).await?;
        }

        let now = Utc::now();
        let chat = sqlx::query_as::<_, Chat>(
            r#"
            INSERT INTO chat.chats
                (chat_type, name, created_by, last_activity, active_participants, created_at, updated_at)
            VALUES ('group', $1, $2, $3, $4, $3, $3)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(creator)
        .bind(now)
        .bind(member_ids.len() as i32 + 1)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert group chat: {}", e);
            ChatError::DatabaseError(e)
        })?;

        sqlx::query(
            r#"
            INSERT INTO chat.chat_participants (chat_id, user_id, role, joined_at)
            VALUES ($1, $2, 'admin', $3)
            "#,
        )
        .bind(chat.id)
        .bind(creator)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        for member in &member_ids {
            sqlx::query(
                r#"
                INSERT INTO chat.chat_participants (chat_id, user_id, role, joined_at)
                VALUES ($1, $2, 'member', $3)
                ON CONFLICT (chat_id, user_id) DO NOTHING
                "#,
            )
            .bind(chat.id)
            .bind(member)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(ChatError::DatabaseError)?;
        }

        info!("Created group chat {} ({})", chat.id, name);

        let mut affected = member_ids.clone();
        affected.push(*creator);
        self.invalidate_chat_lists(&affected).await;

        self.build_chat_response(chat, creator).await
    }

    /// Soft delete a chat; admin participants only.
    pub async fn soft_delete_chat(&self, chat_id: i64, user_id: &Uuid) -> Result<(), ChatError> {
        let participant = self
            .find_active_participant(chat_id, user_id)
            .await?
            .ok_or(ChatError::NotAParticipant)?;

        if participant.role != ParticipantRole::Admin.as_str() {
            return Err(ChatError::AdminRequired);
        }

        sqlx::query(
            "UPDATE chat.chats SET is_deleted = true, updated_at = $2 WHERE id = $1",
        )
        .bind(chat_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        info!("Chat {} soft-deleted by user {}", chat_id, user_id);

        match self.active_participant_ids(chat_id).await {
            Ok(ids) => self.invalidate_chat_lists(&ids).await,
            Err(e) => error!("Failed to list participants for cache invalidation: {}", e),
        }

        Ok(())
    }

    /// The caller's chat list, most recent activity first.
    pub async fn get_user_chats(
        &self,
        user_id: &Uuid,
        page: Option<i64>,
    ) -> Result<Vec<ChatResponse>, ChatError> {
        let page = page.unwrap_or(1).max(1);
        let offset = (page - 1) * CHATS_PER_PAGE;

        // First page is cached per user
        if page == 1 {
            if let Some(cache) = &self.redis_cache {
                if let Ok(Some(cached)) = cache.get_chat_list(user_id).await {
                    if let Ok(chats) = serde_json::from_str::<Vec<ChatResponse>>(&cached) {
                        return Ok(chats);
                    }
                }
            }
        }

        let chats = sqlx::query_as::<_, Chat>(
            r#"
            SELECT c.* FROM chat.chats c
            JOIN chat.chat_participants p ON p.chat_id = c.id
            WHERE p.user_id = $1 AND p.is_active = true AND c.is_deleted = false
            ORDER BY c.last_activity DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(CHATS_PER_PAGE)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        let mut responses = Vec::with_capacity(chats.len());
        for chat in chats {
            responses.push(self.build_chat_response(chat, user_id).await?);
        }

        if page == 1 {
            if let Some(cache) = &self.redis_cache {
                let json = serde_json::to_string(&responses).unwrap_or_default();
                if let Err(e) = cache.cache_chat_list(user_id, &json).await {
                    error!("Failed to cache chat list for {}: {}", user_id, e);
                }
            }
        }

        Ok(responses)
    }

    /// Unread messages in a chat for a user.
    ///
    /// The per-message read ledger is authoritative; the participant
    /// watermark is only a UI hint.
    pub async fn unread_count(&self, chat_id: i64, user_id: &Uuid) -> Result<i64, ChatError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM chat.messages m
            WHERE m.chat_id = $1 AND m.sender_id <> $2 AND m.is_deleted = false
              AND NOT EXISTS (
                SELECT 1 FROM chat.message_reads r
                WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)
    }

    /// Drop the cached chat lists of the affected users; best-effort.
    pub async fn invalidate_chat_lists(&self, user_ids: &[Uuid]) {
        if let Some(cache) = &self.redis_cache {
            if let Err(e) = cache.invalidate_chat_lists(user_ids).await {
                error!("Failed to invalidate chat list caches: {}", e);
            }
        }
    }

    async fn build_chat_response(
        &self,
        chat: Chat,
        for_user: &Uuid,
    ) -> Result<ChatResponse, ChatError> {
        let participant_rows = sqlx::query(
            r#"
            SELECT p.role, p.joined_at, u.id, u.display_name AS name, u.avatar_url, u.role AS user_role
            FROM chat.chat_participants p
            JOIN chat.users u ON u.id = p.user_id
            WHERE p.chat_id = $1 AND p.is_active = true
            ORDER BY p.joined_at ASC
            "#,
        )
        .bind(chat.id)
        .fetch_all(&self.pool)
        .await
        .map_err(ChatError::DatabaseError)?;

        let mut participants = Vec::with_capacity(participant_rows.len());
        for row in participant_rows {
            let role = if row.get::<String, _>("role") == "admin" {
                ParticipantRole::Admin
            } else {
                ParticipantRole::Member
            };
            participants.push(ParticipantInfo {
                user: UserBrief {
                    id: row.get("id"),
                    name: row.get("name"),
                    avatar_url: row.get("avatar_url"),
                    role: row.get("user_role"),
                },
                role,
                joined_at: row.get("joined_at"),
            });
        }

        let last_message = match chat.last_message_id {
            Some(message_id) => sqlx::query(
                r#"
                SELECT m.id, m.content, m.created_at, u.display_name AS sender_name
                FROM chat.messages m
                JOIN chat.users u ON u.id = m.sender_id
                WHERE m.id = $1 AND m.is_deleted = false
                "#,
            )
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ChatError::DatabaseError)?
            .map(|row| LastMessagePreview {
                id: row.get("id"),
                content: row.get("content"),
                sender_name: row.get("sender_name"),
                created_at: row.get("created_at"),
            }),
            None => None,
        };

        let unread_count = self.unread_count(chat.id, for_user).await?;

        let chat_type = ChatType::from_str(&chat.chat_type)
            .map_err(ChatError::InternalError)?;

        Ok(ChatResponse {
            id: chat.id,
            chat_type,
            name: chat.name,
            participants,
            last_message,
            last_activity: chat.last_activity,
            message_count: chat.message_count,
            unread_count,
        })
    }
}
