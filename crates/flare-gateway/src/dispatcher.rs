use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use flare_core::EventSink;
use flare_types::events::{Audience, GatewayEvent, Room};

/// Manages all connected clients and routes published events to their
/// audience: everyone, one user's connections, or a room's subscribers.
///
/// All maps sit behind std RwLocks so `publish` stays synchronous — the
/// Toggle Engine calls it while holding a per-target lock, and event
/// order for one target must match write order.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel — every connected client receives these
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: user_id -> username
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,

    /// Room subscriptions: room -> subscribed user ids
    rooms: RwLock<HashMap<Room, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the global event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Send an event to all connected clients. Best-effort: with no
    /// subscribers the event is simply dropped.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .expect("user channel lock poisoned")
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self
            .inner
            .user_channels
            .write()
            .expect("user channel lock poisoned");
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user's connection, if any.
    pub fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self
            .inner
            .user_channels
            .read()
            .expect("user channel lock poisoned");
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    // -- Rooms --

    pub fn join_room(&self, user_id: Uuid, room: Room) {
        self.inner
            .rooms
            .write()
            .expect("room lock poisoned")
            .entry(room)
            .or_default()
            .insert(user_id);
    }

    pub fn leave_room(&self, user_id: Uuid, room: Room) {
        let mut rooms = self.inner.rooms.write().expect("room lock poisoned");
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&user_id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
    }

    pub fn leave_all_rooms(&self, user_id: Uuid) {
        let mut rooms = self.inner.rooms.write().expect("room lock poisoned");
        rooms.retain(|_, members| {
            members.remove(&user_id);
            !members.is_empty()
        });
    }

    /// Deliver an event to every user subscribed to the room.
    pub fn send_to_room(&self, room: Room, event: GatewayEvent) {
        let members: Vec<Uuid> = {
            let rooms = self.inner.rooms.read().expect("room lock poisoned");
            match rooms.get(&room) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };
        for user_id in members {
            self.send_to_user(user_id, event.clone());
        }
    }

    // -- Presence --

    /// Register a user as online and announce it.
    pub fn user_online(&self, user_id: Uuid, username: String) {
        self.inner
            .online_users
            .write()
            .expect("online user lock poisoned")
            .insert(user_id, username.clone());

        self.broadcast(GatewayEvent::UserOnline {
            user_id,
            username,
            is_online: true,
        });
    }

    /// Register a user as offline. Returns false (and does nothing) when
    /// a newer connection has already taken over the user channel.
    pub fn user_offline(&self, user_id: Uuid, conn_id: Uuid, last_seen: DateTime<Utc>) -> bool {
        let is_current = {
            let channels = self
                .inner
                .user_channels
                .read()
                .expect("user channel lock poisoned");
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            return false;
        }

        let username = self
            .inner
            .online_users
            .write()
            .expect("online user lock poisoned")
            .remove(&user_id)
            .unwrap_or_default();

        self.unregister_user_channel(user_id, conn_id);
        self.leave_all_rooms(user_id);

        self.broadcast(GatewayEvent::UserOffline {
            user_id,
            username,
            is_online: false,
            last_seen,
        });

        true
    }

    /// Get list of online users.
    pub fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .expect("online user lock poisoned")
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Dispatcher {
    fn publish(&self, event: GatewayEvent, audience: Audience) {
        match audience {
            Audience::All => self.broadcast(event),
            Audience::User(user_id) => self.send_to_user(user_id, event),
            Audience::Room(room) => self.send_to_room(room, event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing_event(user_id: Uuid) -> GatewayEvent {
        GatewayEvent::UserTyping {
            user_id,
            username: "tester".into(),
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn user_audience_reaches_only_that_user() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_conn_a, mut rx_a) = dispatcher.register_user_channel(alice);
        let (_conn_b, mut rx_b) = dispatcher.register_user_channel(bob);

        dispatcher.publish(typing_event(bob), Audience::User(alice));

        assert!(matches!(
            rx_a.try_recv(),
            Ok(GatewayEvent::UserTyping { .. })
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_audience_reaches_only_subscribers() {
        let dispatcher = Dispatcher::new();
        let member = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let (_c1, mut rx_member) = dispatcher.register_user_channel(member);
        let (_c2, mut rx_outsider) = dispatcher.register_user_channel(outsider);

        let post_id = Uuid::new_v4();
        dispatcher.join_room(member, Room::Post(post_id));

        dispatcher.publish(
            GatewayEvent::PostDeleted { post_id },
            Audience::Room(Room::Post(post_id)),
        );

        assert!(matches!(
            rx_member.try_recv(),
            Ok(GatewayEvent::PostDeleted { .. })
        ));
        assert!(rx_outsider.try_recv().is_err());

        dispatcher.leave_room(member, Room::Post(post_id));
        dispatcher.publish(
            GatewayEvent::PostDeleted { post_id },
            Audience::Room(Room::Post(post_id)),
        );
        assert!(rx_member.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_newer_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(user);
        dispatcher.user_online(user, "reconnecting".into());

        // Reconnect: a fresh channel takes over the user entry.
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user);

        // The old connection's teardown must be a no-op now.
        assert!(!dispatcher.user_offline(user, old_conn, Utc::now()));
        assert_eq!(dispatcher.online_users().len(), 1);

        dispatcher.send_to_user(user, typing_event(user));
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_preserves_publish_order() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let post_id = Uuid::new_v4();
        for count in 1..=3 {
            dispatcher.publish(
                GatewayEvent::PostLikeUpdate {
                    post_id,
                    like_count: count,
                    is_liked: true,
                    user_id: Uuid::new_v4(),
                },
                Audience::All,
            );
        }

        for expected in 1..=3 {
            match rx.recv().await.unwrap() {
                GatewayEvent::PostLikeUpdate { like_count, .. } => {
                    assert_eq!(like_count, expected)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
