use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use uuid::Uuid;

use crate::websocket::fanout::ConnId;

/// Result of a connection-set mutation.
///
/// Only the 0↔1 edges carry a transition; a second tab or device
/// connecting or disconnecting is NoChange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    CameOnline,
    WentOffline,
    NoChange,
}

/// In-memory map of user identity to live connection handles.
///
/// This set is the authoritative answer to "is the user online"; the
/// persisted flag on the user row is a best-effort denormalization.
#[derive(Default)]
pub struct PresenceStore {
    inner: Mutex<HashMap<Uuid, HashSet<ConnId>>>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection for a user.
    pub fn connect(&self, user_id: Uuid, conn_id: ConnId) -> Transition {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        let conns = inner.entry(user_id).or_default();
        let was_offline = conns.is_empty();
        conns.insert(conn_id);
        if was_offline {
            Transition::CameOnline
        } else {
            Transition::NoChange
        }
    }

    /// Remove a connection for a user.
    ///
    /// Safe to call for a connection that was never recorded; disconnects
    /// racing an in-flight connect resolve to whatever the set says.
    pub fn disconnect(&self, user_id: Uuid, conn_id: ConnId) -> Transition {
        let mut inner = self.inner.lock().expect("presence lock poisoned");
        let Some(conns) = inner.get_mut(&user_id) else {
            return Transition::NoChange;
        };
        let removed = conns.remove(&conn_id);
        if removed && conns.is_empty() {
            inner.remove(&user_id);
            Transition::WentOffline
        } else {
            Transition::NoChange
        }
    }

    /// A user is online iff at least one live connection exists.
    pub fn is_online(&self, user_id: &Uuid) -> bool {
        let inner = self.inner.lock().expect("presence lock poisoned");
        inner.get(user_id).map_or(false, |conns| !conns.is_empty())
    }

    pub fn connection_count(&self, user_id: &Uuid) -> usize {
        let inner = self.inner.lock().expect("presence lock poisoned");
        inner.get(user_id).map_or(0, |conns| conns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_connection_is_edge() {
        let store = PresenceStore::new();
        let user = Uuid::new_v4();
        assert_eq!(store.connect(user, Uuid::new_v4()), Transition::CameOnline);
        assert!(store.is_online(&user));
    }

    #[test]
    fn test_second_connection_is_not_edge() {
        let store = PresenceStore::new();
        let user = Uuid::new_v4();
        store.connect(user, Uuid::new_v4());
        assert_eq!(store.connect(user, Uuid::new_v4()), Transition::NoChange);
        assert_eq!(store.connection_count(&user), 2);
    }

    #[test]
    fn test_multi_device_disconnect_edges() {
        // Two simultaneous connections, closing one: no transition.
        // Closing the second (last): exactly one offline transition.
        let store = PresenceStore::new();
        let user = Uuid::new_v4();
        let tab = Uuid::new_v4();
        let phone = Uuid::new_v4();

        store.connect(user, tab);
        store.connect(user, phone);

        assert_eq!(store.disconnect(user, tab), Transition::NoChange);
        assert!(store.is_online(&user));
        assert_eq!(store.disconnect(user, phone), Transition::WentOffline);
        assert!(!store.is_online(&user));
    }

    #[test]
    fn test_unknown_disconnect_is_noop() {
        let store = PresenceStore::new();
        let user = Uuid::new_v4();
        assert_eq!(store.disconnect(user, Uuid::new_v4()), Transition::NoChange);

        store.connect(user, Uuid::new_v4());
        // Disconnecting a handle that was never registered must not flip
        // the user offline
        assert_eq!(store.disconnect(user, Uuid::new_v4()), Transition::NoChange);
        assert!(store.is_online(&user));
    }

    #[test]
    fn test_reconnect_after_offline() {
        let store = PresenceStore::new();
        let user = Uuid::new_v4();
        let conn = Uuid::new_v4();

        store.connect(user, conn);
        store.disconnect(user, conn);
        assert_eq!(store.connect(user, Uuid::new_v4()), Transition::CameOnline);
    }
}
