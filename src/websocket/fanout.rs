use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::cache::redis::RedisCache;
use crate::websocket::events::ServerEvent;

/// Identifier for one live socket connection
pub type ConnId = Uuid;

/// Broadcast seam between the services and the live connections.
///
/// Handlers and services receive this as an injected dependency so tests
/// can substitute a mock and run without sockets.
#[cfg_attr(test, mockall::automock)]
pub trait Broadcaster: Send + Sync {
    /// Push an event to every live connection, regardless of rooms.
    fn broadcast_all(&self, event: &ServerEvent);

    /// Push an event to every connection currently joined to a room,
    /// optionally excluding one connection (e.g. the typing sender).
    fn broadcast_room(&self, chat_id: i64, event: &ServerEvent, exclude: Option<ConnId>);

    /// Push an event on a user's personal mailbox channel.
    fn send_user(&self, user_id: &Uuid, event: &ServerEvent);

    /// Push an event to a single connection.
    fn send_conn(&self, conn_id: ConnId, event: &ServerEvent);
}

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct FanoutInner {
    connections: HashMap<ConnId, ConnectionEntry>,
    users: HashMap<Uuid, HashSet<ConnId>>,
    rooms: HashMap<i64, HashSet<ConnId>>,
}

/// Connection registry and room index.
///
/// Room events are delivered in-process; per-room ordering holds because
/// sends go out over unbounded channels while the registry lock is held.
/// Personal mailbox events ride Redis pub/sub when Redis is configured,
/// which is also what makes them visible to other server instances.
pub struct ChatFanout {
    inner: Mutex<FanoutInner>,
    redis_cache: Option<Arc<RedisCache>>,
}

impl ChatFanout {
    pub fn new(redis_cache: Option<Arc<RedisCache>>) -> Self {
        Self {
            inner: Mutex::new(FanoutInner::default()),
            redis_cache,
        }
    }

    /// Register a new live connection for a user.
    pub fn register(&self, conn_id: ConnId, user_id: Uuid, tx: mpsc::UnboundedSender<ServerEvent>) {
        let mut inner = self.inner.lock().expect("fanout lock poisoned");
        inner
            .connections
            .insert(conn_id, ConnectionEntry { user_id, tx });
        inner.users.entry(user_id).or_default().insert(conn_id);
        debug!("Registered connection {} for user {}", conn_id, user_id);
    }

    /// Remove a connection from the registry and from every room it joined.
    pub fn unregister(&self, conn_id: ConnId) {
        let mut inner = self.inner.lock().expect("fanout lock poisoned");
        if let Some(entry) = inner.connections.remove(&conn_id) {
            if let Some(conns) = inner.users.get_mut(&entry.user_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    inner.users.remove(&entry.user_id);
                }
            }
        }
        for members in inner.rooms.values_mut() {
            members.remove(&conn_id);
        }
        inner.rooms.retain(|_, members| !members.is_empty());
        debug!("Unregistered connection {}", conn_id);
    }

    /// Add a connection to a room channel.
    pub fn join_room(&self, chat_id: i64, conn_id: ConnId) {
        let mut inner = self.inner.lock().expect("fanout lock poisoned");
        inner.rooms.entry(chat_id).or_default().insert(conn_id);
    }

    /// Remove a connection from a room channel.
    pub fn leave_room(&self, chat_id: i64, conn_id: ConnId) {
        let mut inner = self.inner.lock().expect("fanout lock poisoned");
        if let Some(members) = inner.rooms.get_mut(&chat_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                inner.rooms.remove(&chat_id);
            }
        }
    }
}

impl Broadcaster for ChatFanout {
    fn broadcast_all(&self, event: &ServerEvent) {
        let inner = self.inner.lock().expect("fanout lock poisoned");
        for entry in inner.connections.values() {
            // A closed receiver means the connection is tearing down
            let _ = entry.tx.send(event.clone());
        }
    }

    fn broadcast_room(&self, chat_id: i64, event: &ServerEvent, exclude: Option<ConnId>) {
        let inner = self.inner.lock().expect("fanout lock poisoned");
        let Some(members) = inner.rooms.get(&chat_id) else {
            return;
        };
        for conn_id in members {
            if Some(*conn_id) == exclude {
                continue;
            }
            if let Some(entry) = inner.connections.get(conn_id) {
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    fn send_user(&self, user_id: &Uuid, event: &ServerEvent) {
        // With Redis configured the mailbox channel is the single path:
        // local connections are subscribed to it too, so an additional
        // in-process send would double-deliver.
        if let Some(cache) = &self.redis_cache {
            let cache = cache.clone();
            let user_id = *user_id;
            let json = event.to_json();
            tokio::spawn(async move {
                if let Err(e) = cache.publish_user_event(&user_id, &json).await {
                    error!("Failed to publish mailbox event for {}: {}", user_id, e);
                }
            });
            return;
        }

        let inner = self.inner.lock().expect("fanout lock poisoned");
        if let Some(conns) = inner.users.get(user_id) {
            for conn_id in conns {
                if let Some(entry) = inner.connections.get(conn_id) {
                    let _ = entry.tx.send(event.clone());
                }
            }
        }
    }

    fn send_conn(&self, conn_id: ConnId, event: &ServerEvent) {
        let inner = self.inner.lock().expect("fanout lock poisoned");
        if let Some(entry) = inner.connections.get(&conn_id) {
            let _ = entry.tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(
        fanout: &ChatFanout,
        user_id: Uuid,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        fanout.register(conn_id, user_id, tx);
        (conn_id, rx)
    }

    #[tokio::test]
    async fn test_room_broadcast_reaches_joined_connections_only() {
        let fanout = ChatFanout::new(None);
        let (a, mut rx_a) = connect(&fanout, Uuid::new_v4());
        let (_b, mut rx_b) = connect(&fanout, Uuid::new_v4());

        fanout.join_room(1, a);

        fanout.broadcast_room(1, &ServerEvent::JoinedChat { chat_id: 1 }, None);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_broadcast_excludes_sender() {
        let fanout = ChatFanout::new(None);
        let user = Uuid::new_v4();
        let (a, mut rx_a) = connect(&fanout, user);
        let (b, mut rx_b) = connect(&fanout, Uuid::new_v4());

        fanout.join_room(3, a);
        fanout.join_room(3, b);

        let event = ServerEvent::UserTyping {
            user_id: user,
            user_name: "ann".to_string(),
            chat_id: 3,
        };
        fanout.broadcast_room(3, &event, Some(a));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_room_broadcast_preserves_order() {
        let fanout = ChatFanout::new(None);
        let (a, mut rx_a) = connect(&fanout, Uuid::new_v4());
        fanout.join_room(9, a);

        for chat_id in [9, 9, 9] {
            fanout.broadcast_room(chat_id, &ServerEvent::LeftChat { chat_id }, None);
        }
        fanout.broadcast_room(9, &ServerEvent::JoinedChat { chat_id: 9 }, None);

        let mut seen = Vec::new();
        while let Ok(event) = rx_a.try_recv() {
            seen.push(event.to_json());
        }
        assert_eq!(seen.len(), 4);
        assert!(seen[3].contains("joined_chat"), "last sent is last received");
    }

    #[tokio::test]
    async fn test_send_user_without_redis_reaches_all_user_connections() {
        let fanout = ChatFanout::new(None);
        let user = Uuid::new_v4();
        let (_a, mut rx_a) = connect(&fanout, user);
        let (_b, mut rx_b) = connect(&fanout, user);
        let (_c, mut rx_c) = connect(&fanout, Uuid::new_v4());

        fanout.send_user(&user, &ServerEvent::LeftChat { chat_id: 1 });

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_removes_room_membership() {
        let fanout = ChatFanout::new(None);
        let (a, mut rx_a) = connect(&fanout, Uuid::new_v4());
        fanout.join_room(5, a);
        fanout.unregister(a);

        fanout.broadcast_room(5, &ServerEvent::JoinedChat { chat_id: 5 }, None);
        fanout.broadcast_all(&ServerEvent::LeftChat { chat_id: 5 });

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_all_reaches_every_connection() {
        let fanout = ChatFanout::new(None);
        let (_a, mut rx_a) = connect(&fanout, Uuid::new_v4());
        let (_b, mut rx_b) = connect(&fanout, Uuid::new_v4());

        fanout.broadcast_all(&ServerEvent::UserStatusChange {
            user_id: Uuid::new_v4(),
            is_online: true,
            last_seen: chrono::Utc::now(),
        });

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
