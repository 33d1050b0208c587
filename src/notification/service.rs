use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::chat::model::UserBrief;
use crate::notification::model::{
    render_message, Notification, NotificationError, NotificationKind, NotificationResponse,
    NotificationTarget, TargetKind, AGGREGATION_WINDOW_HOURS, NOTIFICATION_TTL_DAYS,
};
use crate::websocket::events::ServerEvent;
use crate::websocket::fanout::Broadcaster;

const NOTIFICATIONS_PER_PAGE: i64 = 20;

pub struct NotificationService {
    pool: PgPool,
    fanout: Arc<dyn Broadcaster>,
}

impl NotificationService {
    pub fn new(pool: PgPool, fanout: Arc<dyn Broadcaster>) -> Self {
        Self { pool, fanout }
    }

    /// Run the aggregation state machine for a notable event.
    ///
    /// Self-notifications are suppressed before anything else runs.
    /// Aggregatable kinds merge into a same-key row inside the rolling
    /// window via a single atomic update; everything else inserts a new
    /// row. The resolved notification is pushed to the recipient's
    /// mailbox with a fresh unread count.
    pub async fn record_event(
        &self,
        actor_id: &Uuid,
        recipient_id: &Uuid,
        kind: NotificationKind,
        target: NotificationTarget,
    ) -> Result<Option<NotificationResponse>, NotificationError> {
        if actor_id == recipient_id {
            return Ok(None);
        }

        let actor = self.resolve_user(actor_id).await?.ok_or(NotificationError::ActorNotFound)?;

        let now = Utc::now();
        let expires_at = now + Duration::days(NOTIFICATION_TTL_DAYS);

        let merged = if kind.is_aggregatable() {
            self.merge_into_aggregate(recipient_id, actor_id, kind, target, now)
                .await?
        } else {
            None
        };

        let notification = match merged {
            Some(notification) => notification,
            None => {
                let message = render_message(kind, &[actor.name.clone()], 1);
                sqlx::query_as::<_, Notification>(
                    r#"
                    INSERT INTO chat.notifications
                        (recipient_id, actor_id, kind, target_kind, target_id, message,
                         aggregated_count, last_actors, created_at, updated_at, expires_at)
                    VALUES ($1, $2, $3, $4, $5, $6, 1, ARRAY[$2]::uuid[], $7, $7, $8)
                    RETURNING *
                    "#,
                )
                .bind(recipient_id)
                .bind(actor_id)
                .bind(kind.as_str())
                .bind(target.kind.as_str())
                .bind(target.id)
                .bind(&message)
                .bind(now)
                .bind(expires_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to insert notification: {}", e);
                    NotificationError::DatabaseError(e)
                })?
            }
        };

        let response = self.build_response(&notification).await?;
        let unread_count = self.unread_count(recipient_id).await?;

        self.fanout.send_user(
            recipient_id,
            &ServerEvent::NewNotification {
                notification: response.clone(),
                unread_count,
            },
        );

        info!(
            "Notification {} ({}) for recipient {} (count {})",
            notification.id,
            kind.as_str(),
            recipient_id,
            notification.aggregated_count
        );

        Ok(Some(response))
    }

    /// Fold an event into the newest same-key aggregate inside the
    /// window, atomically. Returns None when no aggregate matched.
    async fn merge_into_aggregate(
        &self,
        recipient_id: &Uuid,
        actor_id: &Uuid,
        kind: NotificationKind,
        target: NotificationTarget,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<Notification>, NotificationError> {
        let window_start = now - Duration::hours(AGGREGATION_WINDOW_HOURS);
        let expires_at = now + Duration::days(NOTIFICATION_TTL_DAYS);

        // Count bump, actor prepend (deduplicated, capped), unread
        // resurface, and feed bump all land in one statement so
        // concurrent likers cannot clobber each other
        let merged = sqlx::query_as::<_, Notification>(
            r#"
            UPDATE chat.notifications
            SET aggregated_count = aggregated_count + 1,
                is_aggregated = true,
                actor_id = $4,
                last_actors = (ARRAY[$4::uuid] || array_remove(last_actors, $4::uuid))[1:3],
                is_read = false,
                read_at = NULL,
                created_at = $5,
                updated_at = $5,
                expires_at = $6
            WHERE id = (
                SELECT id FROM chat.notifications
                WHERE recipient_id = $1 AND kind = $2 AND target_kind = $3
                  AND target_id = $7 AND created_at > $8
                ORDER BY created_at DESC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(recipient_id)
        .bind(kind.as_str())
        .bind(target.kind.as_str())
        .bind(actor_id)
        .bind(now)
        .bind(expires_at)
        .bind(target.id)
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)?;

        let Some(notification) = merged else {
            return Ok(None);
        };

        // Regenerate the summary from the post-merge state; cosmetic, so
        // a failure is logged rather than surfaced
        let names = self.resolve_actor_names(&notification.last_actors).await?;
        let message = render_message(kind, &names, notification.aggregated_count);
        if let Err(e) = sqlx::query("UPDATE chat.notifications SET message = $2 WHERE id = $1")
            .bind(notification.id)
            .bind(&message)
            .execute(&self.pool)
            .await
        {
            error!(
                "Failed to refresh message for notification {}: {}",
                notification.id, e
            );
        }

        Ok(Some(Notification {
            message,
            ..notification
        }))
    }

    /// Unread, unexpired notifications for a recipient.
    pub async fn unread_count(&self, recipient_id: &Uuid) -> Result<i64, NotificationError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM chat.notifications
            WHERE recipient_id = $1 AND is_read = false AND expires_at > now()
            "#,
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)
    }

    /// Paginated feed, newest first; merged aggregates resurface at the
    /// top because the merge bumps created_at.
    pub async fn get_user_notifications(
        &self,
        recipient_id: &Uuid,
        page: Option<i64>,
    ) -> Result<Vec<NotificationResponse>, NotificationError> {
        let page = page.unwrap_or(1).max(1);
        let offset = (page - 1) * NOTIFICATIONS_PER_PAGE;

        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM chat.notifications
            WHERE recipient_id = $1 AND expires_at > now()
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(recipient_id)
        .bind(NOTIFICATIONS_PER_PAGE)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)?;

        let mut responses = Vec::with_capacity(rows.len());
        for row in &rows {
            responses.push(self.build_response(row).await?);
        }

        Ok(responses)
    }

    /// Mark one notification read; idempotent.
    pub async fn mark_as_read(
        &self,
        notification_id: i64,
        recipient_id: &Uuid,
    ) -> Result<(), NotificationError> {
        let result = sqlx::query(
            r#"
            UPDATE chat.notifications
            SET is_read = true, read_at = COALESCE(read_at, now()), updated_at = now()
            WHERE id = $1 AND recipient_id = $2
            "#,
        )
        .bind(notification_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(NotificationError::NotFound);
        }

        Ok(())
    }

    /// Mark the whole feed read; idempotent.
    pub async fn mark_all_read(&self, recipient_id: &Uuid) -> Result<i64, NotificationError> {
        let result = sqlx::query(
            r#"
            UPDATE chat.notifications
            SET is_read = true, read_at = COALESCE(read_at, now()), updated_at = now()
            WHERE recipient_id = $1 AND is_read = false
            "#,
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)?;

        Ok(result.rows_affected() as i64)
    }

    async fn resolve_user(&self, user_id: &Uuid) -> Result<Option<UserBrief>, NotificationError> {
        sqlx::query_as::<_, UserBrief>(
            "SELECT id, display_name AS name, avatar_url, role FROM chat.users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)
    }

    /// Display names for the aggregate actor list, most-recent-first.
    async fn resolve_actor_names(
        &self,
        actor_ids: &[Uuid],
    ) -> Result<Vec<String>, NotificationError> {
        if actor_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, display_name FROM chat.users WHERE id = ANY($1)",
        )
        .bind(actor_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(NotificationError::DatabaseError)?;

        // ANY() does not preserve order; restore the aggregate's
        let mut names = Vec::with_capacity(actor_ids.len());
        for id in actor_ids {
            if let Some(row) = rows.iter().find(|row| row.get::<Uuid, _>("id") == *id) {
                names.push(row.get::<String, _>("display_name"));
            }
        }
        Ok(names)
    }

    async fn build_response(
        &self,
        notification: &Notification,
    ) -> Result<NotificationResponse, NotificationError> {
        let actor = self
            .resolve_user(&notification.actor_id)
            .await?
            .ok_or(NotificationError::ActorNotFound)?;

        let mut last_actors = Vec::with_capacity(notification.last_actors.len());
        for actor_id in &notification.last_actors {
            if let Some(brief) = self.resolve_user(actor_id).await? {
                last_actors.push(brief);
            }
        }

        let kind = NotificationKind::from_str(&notification.kind)
            .map_err(NotificationError::InternalError)?;
        let target_kind = TargetKind::from_str(&notification.target_kind)
            .map_err(NotificationError::InternalError)?;

        Ok(NotificationResponse {
            id: notification.id,
            kind,
            actor,
            target: NotificationTarget {
                kind: target_kind,
                id: notification.target_id,
            },
            message: notification.message.clone(),
            is_read: notification.is_read,
            is_aggregated: notification.is_aggregated,
            aggregated_count: notification.aggregated_count,
            last_actors,
            created_at: notification.created_at,
        })
    }
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

    #[tokio::test]
    async fn test_self_notification_suppressed_before_any_io() {
        // Unreachable pool and a no-expectation mock: the suppression
        // must short-circuit before touching either
        let service = NotificationService::new(
            unreachable_pool(),
            Arc::new(MockBroadcaster::new()),
        );

        let me = Uuid::new_v4();
        let result = service
            .record_event(
                &me,
                &me,
                NotificationKind::Like,
                NotificationTarget {
                    kind: TargetKind::Story,
                    id: 1,
                },
            )
            .await
            .expect("self-notification must not error");

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_record_event_fails_closed_without_storage() {
        let service = NotificationService::new(
            unreachable_pool(),
            Arc::new(MockBroadcaster::new()),
        );

        let result = service
            .record_event(
                &Uuid::new_v4(),
                &Uuid::new_v4(),
                NotificationKind::Follow,
                NotificationTarget {
                    kind: TargetKind::User,
                    id: 0,
                },
            )
            .await;

        assert!(matches!(result, Err(NotificationError::DatabaseError(_))));
    }
}
