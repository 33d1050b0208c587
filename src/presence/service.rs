use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::presence::store::{PresenceStore, Transition};
use crate::websocket::events::ServerEvent;
use crate::websocket::fanout::{Broadcaster, ConnId};

/// Presence bookkeeping around the in-memory store.
///
/// Persists the online flag and broadcasts status changes on 0↔1 edges.
/// Persistence is best-effort: a failed write is logged and the in-memory
/// set stays authoritative for routing.
pub struct PresenceService {
    store: Arc<PresenceStore>,
    pool: PgPool,
    fanout: Arc<dyn Broadcaster>,
}

impl PresenceService {
    pub fn new(store: Arc<PresenceStore>, pool: PgPool, fanout: Arc<dyn Broadcaster>) -> Self {
        Self {
            store,
            pool,
            fanout,
        }
    }

    pub fn is_online(&self, user_id: &Uuid) -> bool {
        self.store.is_online(user_id)
    }

    pub async fn connect(&self, user_id: Uuid, conn_id: ConnId) {
        if self.store.connect(user_id, conn_id) == Transition::CameOnline {
            info!("User {} came online", user_id);
            self.persist_and_broadcast(user_id, true).await;
        }
    }

    pub async fn disconnect(&self, user_id: Uuid, conn_id: ConnId) {
        if self.store.disconnect(user_id, conn_id) == Transition::WentOffline {
            info!("User {} went offline", user_id);
            self.persist_and_broadcast(user_id, false).await;
        }
    }

    async fn persist_and_broadcast(&self, user_id: Uuid, is_online: bool) {
        let last_seen = Utc::now();

        let result = sqlx::query(
            "UPDATE chat.users SET is_online = $2, last_seen = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(is_online)
        .bind(last_seen)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            // Best-effort: routing still follows the in-memory set
            error!("Failed to persist presence for {}: {}", user_id, e);
        }

        // Any profile view may show presence, so this goes process-wide
        self.fanout.broadcast_all(&ServerEvent::UserStatusChange {
            user_id,
            is_online,
            last_seen,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::fanout::MockBroadcaster;
    use sqlx::postgres::PgPoolOptions;

    // A lazily-connected pool never reaches a server, so every persistence
    // write fails; presence must keep working from memory regardless.
    fn unreachable_pool() -> PgPool {
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_millis(100))
            .connect_lazy("postgres://unreachable-host/none")
            .expect("lazy pool construction should not connect")
    }

    #[tokio::test]
    async fn test_broadcasts_once_per_online_edge() {
        let mut fanout = MockBroadcaster::new();
        fanout
            .expect_broadcast_all()
            .withf(|event| {
                matches!(
                    event,
                    ServerEvent::UserStatusChange { is_online: true, .. }
                )
            })
            .times(1)
            .return_const(());

        let service = PresenceService::new(
            Arc::new(PresenceStore::new()),
            unreachable_pool(),
            Arc::new(fanout),
        );

        let user = Uuid::new_v4();
        service.connect(user, Uuid::new_v4()).await;
        service.connect(user, Uuid::new_v4()).await;

        assert!(service.is_online(&user));
    }

    #[tokio::test]
    async fn test_offline_broadcast_only_on_last_disconnect() {
        let mut fanout = MockBroadcaster::new();
        // One online edge, one offline edge; the intermediate disconnect
        // must broadcast nothing
        fanout.expect_broadcast_all().times(2).return_const(());

        let service = PresenceService::new(
            Arc::new(PresenceStore::new()),
            unreachable_pool(),
            Arc::new(fanout),
        );

        let user = Uuid::new_v4();
        let tab = Uuid::new_v4();
        let phone = Uuid::new_v4();

        service.connect(user, tab).await;
        service.connect(user, phone).await;
        service.disconnect(user, tab).await;
        assert!(service.is_online(&user));

        service.disconnect(user, phone).await;
        assert!(!service.is_online(&user));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_authoritative() {
        let mut fanout = MockBroadcaster::new();
        fanout.expect_broadcast_all().return_const(());

        let service = PresenceService::new(
            Arc::new(PresenceStore::new()),
            unreachable_pool(),
            Arc::new(fanout),
        );

        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();
        service.connect(user, conn).await;
        assert!(service.is_online(&user), "online despite failed persist");

        service.disconnect(user, conn).await;
        assert!(!service.is_online(&user));
    }
}
