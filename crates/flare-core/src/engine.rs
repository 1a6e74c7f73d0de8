use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use flare_db::{Database, format_timestamp};
use flare_types::events::{Audience, GatewayEvent, JoinAction};
use flare_types::models::UserProfile;

use crate::error::CoreError;
use crate::locks::TargetLocks;
use crate::sink::EventSink;

/// Which membership set a toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleKind {
    HotspotJoin,
    PostLike,
}

/// Result of a toggle: the actor's membership after the call, the
/// recomputed set cardinality, and (for hotspot joins) the surviving
/// member profiles in join order.
#[derive(Debug, Clone)]
pub struct ToggleOutcome {
    pub new_state: bool,
    pub count: usize,
    pub members: Vec<UserProfile>,
}

/// Serialized idempotent membership transitions.
///
/// Every mutation of a like/joined set goes through here: the engine
/// holds one async mutex per (target, kind) pair, so the
/// read-modify-write sequence can never interleave with another toggle
/// or a delete-cascade on the same target. Counts are recomputed from
/// the set after the write — never derived from a pre-read delta.
pub struct ToggleEngine {
    db: Arc<Database>,
    sink: Arc<dyn EventSink>,
    locks: TargetLocks,
}

impl ToggleEngine {
    pub fn new(db: Arc<Database>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            db,
            sink,
            locks: TargetLocks::new(),
        }
    }

    /// Legacy bare toggle: direction is inferred from current membership.
    /// Not safe to retry blindly — a client that lost the response should
    /// use [`Self::set_membership`] instead.
    pub async fn toggle(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        kind: ToggleKind,
    ) -> Result<ToggleOutcome, CoreError> {
        self.apply(actor_id, target_id, kind, None).await
    }

    /// Explicit-intent variant: drives the membership to `desired` and
    /// no-ops (publishing nothing) when it already matches, which makes
    /// it safe under blind retries.
    pub async fn set_membership(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        kind: ToggleKind,
        desired: bool,
    ) -> Result<ToggleOutcome, CoreError> {
        self.apply(actor_id, target_id, kind, Some(desired)).await
    }

    async fn apply(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        kind: ToggleKind,
        desired: Option<bool>,
    ) -> Result<ToggleOutcome, CoreError> {
        if self.db.get_user_by_id(&actor_id.to_string())?.is_none() {
            return Err(CoreError::NotFound("user"));
        }

        let actor = actor_id.to_string();
        let target = target_id.to_string();

        // Target existence is checked under the lock so a concurrent
        // delete cannot interleave with the membership write.
        let _guard = self.locks.acquire(target_id, kind).await;

        let current = match kind {
            ToggleKind::HotspotJoin => {
                if self.db.get_hotspot(&target)?.is_none() {
                    return Err(CoreError::NotFound("hotspot"));
                }
                self.db.hotspot_member_exists(&target, &actor)?
            }
            ToggleKind::PostLike => {
                if self.db.get_post(&target)?.is_none() {
                    return Err(CoreError::NotFound("post"));
                }
                self.db.post_like_exists(&target, &actor)?
            }
        };

        let new_state = desired.unwrap_or(!current);
        if new_state == current {
            // Explicit intent already satisfied: no write, no event.
            return Ok(ToggleOutcome {
                new_state,
                count: self.count(&target, kind)?,
                members: self.members(&target, kind)?,
            });
        }

        let now = format_timestamp(Utc::now());
        match (kind, new_state) {
            (ToggleKind::HotspotJoin, true) => {
                self.db.insert_hotspot_member(&target, &actor, &now)?
            }
            (ToggleKind::HotspotJoin, false) => {
                self.db.delete_hotspot_member(&target, &actor)?
            }
            (ToggleKind::PostLike, true) => self.db.insert_post_like(&target, &actor, &now)?,
            (ToggleKind::PostLike, false) => self.db.delete_post_like(&target, &actor)?,
        }

        let count = self.count(&target, kind)?;
        let members = self.members(&target, kind)?;

        debug!(
            "toggle {:?} target={} actor={} -> state={} count={}",
            kind, target_id, actor_id, new_state, count
        );

        // Published while the per-target lock is still held, so event
        // order matches write order for this target.
        let event = match kind {
            ToggleKind::HotspotJoin => GatewayEvent::HotspotJoinUpdate {
                hotspot_id: target_id,
                joined_users: members.clone(),
                joined_count: count,
                user_id: actor_id,
                action: if new_state {
                    JoinAction::Join
                } else {
                    JoinAction::Leave
                },
            },
            ToggleKind::PostLike => GatewayEvent::PostLikeUpdate {
                post_id: target_id,
                like_count: count,
                is_liked: new_state,
                user_id: actor_id,
            },
        };
        self.sink.publish(event, Audience::All);

        Ok(ToggleOutcome {
            new_state,
            count,
            members,
        })
    }

    fn count(&self, target: &str, kind: ToggleKind) -> Result<usize, CoreError> {
        let count = match kind {
            ToggleKind::HotspotJoin => self.db.count_hotspot_members(target)?,
            ToggleKind::PostLike => self.db.count_post_likes(target)?,
        };
        Ok(count)
    }

    fn members(&self, target: &str, kind: ToggleKind) -> Result<Vec<UserProfile>, CoreError> {
        match kind {
            ToggleKind::HotspotJoin => Ok(self
                .db
                .hotspot_member_profiles(target)?
                .into_iter()
                .map(|row| row.into_profile())
                .collect()),
            // Like events carry only the count; no profile fan-out.
            ToggleKind::PostLike => Ok(Vec::new()),
        }
    }

    /// Bulk read-state transition: flips every unread message from
    /// `partner_id` to `actor_id` and stamps the read time. Returns the
    /// number of messages transitioned; the second consecutive call
    /// returns 0.
    pub async fn mark_read(&self, actor_id: Uuid, partner_id: Uuid) -> Result<u64, CoreError> {
        let now = format_timestamp(Utc::now());
        let updated = self
            .db
            .mark_messages_read(&actor_id.to_string(), &partner_id.to_string(), &now)?;

        if updated > 0 {
            // Receipt goes to the partner: their conversation with the
            // reader has just been read.
            self.sink.publish(
                GatewayEvent::MessagesRead {
                    read_by: actor_id,
                    conversation_with: actor_id,
                },
                Audience::User(partner_id),
            );
        }

        Ok(updated)
    }

    /// Delete a post and its like/reply sets, under the same lock the
    /// like toggles use. Author-or-admin only.
    pub async fn delete_post(&self, actor_id: Uuid, post_id: Uuid) -> Result<(), CoreError> {
        let actor = self
            .db
            .get_user_by_id(&actor_id.to_string())?
            .ok_or(CoreError::NotFound("user"))?;

        let _guard = self.locks.acquire(post_id, ToggleKind::PostLike).await;

        let post = self
            .db
            .get_post(&post_id.to_string())?
            .ok_or(CoreError::NotFound("post"))?;

        if post.author_id != actor_id.to_string() && !actor.is_admin {
            return Err(CoreError::Forbidden("not authorized to delete this post"));
        }

        self.db.delete_post(&post_id.to_string())?;
        self.locks.discard(post_id, ToggleKind::PostLike);

        self.sink
            .publish(GatewayEvent::PostDeleted { post_id }, Audience::All);
        Ok(())
    }

    /// Delete a hotspot and its joined set. Author-or-admin only.
    pub async fn delete_hotspot(&self, actor_id: Uuid, hotspot_id: Uuid) -> Result<(), CoreError> {
        let actor = self
            .db
            .get_user_by_id(&actor_id.to_string())?
            .ok_or(CoreError::NotFound("user"))?;

        let _guard = self.locks.acquire(hotspot_id, ToggleKind::HotspotJoin).await;

        let hotspot = self
            .db
            .get_hotspot(&hotspot_id.to_string())?
            .ok_or(CoreError::NotFound("hotspot"))?;

        if hotspot.author_id != actor_id.to_string() && !actor.is_admin {
            return Err(CoreError::Forbidden(
                "not authorized to delete this hotspot",
            ));
        }

        self.db.delete_hotspot(&hotspot_id.to_string())?;
        self.locks.discard(hotspot_id, ToggleKind::HotspotJoin);

        self.sink
            .publish(GatewayEvent::HotspotDeleted { hotspot_id }, Audience::All);
        Ok(())
    }

    /// Remove a (deleted) user from every like/joined set they appear in,
    /// target by target through the serialized path. Publishes nothing —
    /// the caller announces the user-level deletion.
    pub async fn purge_user(&self, user_id: Uuid) -> Result<(), CoreError> {
        let uid = user_id.to_string();

        for post_id in self.db.post_ids_liked_by(&uid)? {
            if let Ok(target) = post_id.parse::<Uuid>() {
                let _guard = self.locks.acquire(target, ToggleKind::PostLike).await;
                self.db.delete_post_like(&post_id, &uid)?;
            }
        }

        for hotspot_id in self.db.hotspot_ids_joined_by(&uid)? {
            if let Ok(target) = hotspot_id.parse::<Uuid>() {
                let _guard = self.locks.acquire(target, ToggleKind::HotspotJoin).await;
                self.db.delete_hotspot_member(&hotspot_id, &uid)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    pub(crate) struct RecordingSink {
        events: StdMutex<Vec<(GatewayEvent, Audience)>>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
            }
        }

        pub(crate) fn events(&self) -> Vec<(GatewayEvent, Audience)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: GatewayEvent, audience: Audience) {
            self.events.lock().unwrap().push((event, audience));
        }
    }

    pub(crate) fn setup() -> (Arc<Database>, Arc<RecordingSink>, Arc<ToggleEngine>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new());
        let engine = Arc::new(ToggleEngine::new(db.clone(), sink.clone()));
        (db, sink, engine)
    }

    pub(crate) fn add_user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = format_timestamp(Utc::now());
        db.create_user(&id.to_string(), username, "hash", "", "", &now)
            .unwrap();
        id
    }

    pub(crate) fn add_admin(db: &Database, username: &str) -> Uuid {
        let id = add_user(db, username);
        db.set_admin(&id.to_string(), true).unwrap();
        id
    }

    pub(crate) fn add_post(db: &Database, author: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let now = format_timestamp(Utc::now());
        db.insert_post(&id.to_string(), &author.to_string(), "hello", "[]", &now)
            .unwrap();
        id
    }

    pub(crate) fn add_hotspot(db: &Database, author: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let now = format_timestamp(Utc::now());
        db.insert_hotspot(
            &id.to_string(),
            &author.to_string(),
            "rooftop",
            "sunset spot",
            52.52,
            13.405,
            &now,
        )
        .unwrap();
        id
    }

    #[tokio::test]
    async fn even_number_of_toggles_returns_to_original_state() {
        let (db, _sink, engine) = setup();
        let author = add_user(&db, "author");
        let actor = add_user(&db, "actor");
        let post = add_post(&db, author);

        for i in 0..4 {
            let outcome = engine
                .toggle(actor, post, ToggleKind::PostLike)
                .await
                .unwrap();
            assert_eq!(outcome.new_state, i % 2 == 0);
        }

        assert!(!db.post_like_exists(&post.to_string(), &actor.to_string()).unwrap());
        assert_eq!(db.count_post_likes(&post.to_string()).unwrap(), 0);
    }

    #[tokio::test]
    async fn count_always_matches_set_cardinality() {
        let (db, _sink, engine) = setup();
        let author = add_user(&db, "author");
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let post = add_post(&db, author);

        let o1 = engine.toggle(a, post, ToggleKind::PostLike).await.unwrap();
        assert_eq!(o1.count, 1);
        let o2 = engine.toggle(b, post, ToggleKind::PostLike).await.unwrap();
        assert_eq!(o2.count, 2);
        let o3 = engine.toggle(a, post, ToggleKind::PostLike).await.unwrap();
        assert!(!o3.new_state);
        assert_eq!(o3.count, 1);
        assert_eq!(o3.count, db.count_post_likes(&post.to_string()).unwrap());
    }

    #[tokio::test]
    async fn hotspot_join_is_a_pure_toggle() {
        let (db, sink, engine) = setup();
        let author = add_user(&db, "author");
        let joiner = add_user(&db, "joiner");
        let hotspot = add_hotspot(&db, author);

        let first = engine
            .toggle(joiner, hotspot, ToggleKind::HotspotJoin)
            .await
            .unwrap();
        assert!(first.new_state);
        assert_eq!(first.count, 1);
        assert_eq!(first.members.len(), 1);
        assert_eq!(first.members[0].id, joiner);

        let second = engine
            .toggle(joiner, hotspot, ToggleKind::HotspotJoin)
            .await
            .unwrap();
        assert!(!second.new_state);
        assert_eq!(second.count, 0);
        assert!(second.members.is_empty());

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            (
                GatewayEvent::HotspotJoinUpdate {
                    joined_count: 1,
                    action: JoinAction::Join,
                    ..
                },
                Audience::All
            )
        ));
        assert!(matches!(
            &events[1],
            (
                GatewayEvent::HotspotJoinUpdate {
                    joined_count: 0,
                    action: JoinAction::Leave,
                    ..
                },
                Audience::All
            )
        ));
    }

    #[tokio::test]
    async fn missing_actor_or_target_is_not_found() {
        let (db, _sink, engine) = setup();
        let user = add_user(&db, "user");
        let post = add_post(&db, user);

        let err = engine
            .toggle(Uuid::new_v4(), post, ToggleKind::PostLike)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound("user")));

        let err = engine
            .toggle(user, Uuid::new_v4(), ToggleKind::PostLike)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound("post")));

        let err = engine
            .toggle(user, Uuid::new_v4(), ToggleKind::HotspotJoin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound("hotspot")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_toggles_leave_at_most_one_membership_row() {
        let (db, _sink, engine) = setup();
        let author = add_user(&db, "author");
        let actor = add_user(&db, "actor");
        let hotspot = add_hotspot(&db, author);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .toggle(actor, hotspot, ToggleKind::HotspotJoin)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Five serialized flips from "not joined" end joined exactly once.
        assert_eq!(db.count_hotspot_members(&hotspot.to_string()).unwrap(), 1);
        assert!(
            db.hotspot_member_exists(&hotspot.to_string(), &actor.to_string())
                .unwrap()
        );
    }

    #[tokio::test]
    async fn explicit_intent_is_retry_safe() {
        let (db, sink, engine) = setup();
        let author = add_user(&db, "author");
        let actor = add_user(&db, "actor");
        let hotspot = add_hotspot(&db, author);

        let first = engine
            .set_membership(actor, hotspot, ToggleKind::HotspotJoin, true)
            .await
            .unwrap();
        assert!(first.new_state);
        assert_eq!(first.count, 1);

        // Blind retry: state unchanged, nothing republished.
        let retry = engine
            .set_membership(actor, hotspot, ToggleKind::HotspotJoin, true)
            .await
            .unwrap();
        assert!(retry.new_state);
        assert_eq!(retry.count, 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let (db, sink, engine) = setup();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        for i in 0..3 {
            let now = format_timestamp(Utc::now());
            db.insert_message(
                &Uuid::new_v4().to_string(),
                &alice.to_string(),
                Some(&bob.to_string()),
                &format!("msg {i}"),
                &now,
            )
            .unwrap();
        }

        assert_eq!(engine.mark_read(bob, alice).await.unwrap(), 3);
        assert_eq!(engine.mark_read(bob, alice).await.unwrap(), 0);

        // One receipt, addressed to the sender of the read messages.
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            (GatewayEvent::MessagesRead { read_by, .. }, Audience::User(partner))
                if *read_by == bob && *partner == alice
        ));
    }

    #[tokio::test]
    async fn delete_post_requires_author_or_admin() {
        let (db, sink, engine) = setup();
        let author = add_user(&db, "author");
        let stranger = add_user(&db, "stranger");
        let admin = add_admin(&db, "admin");
        let post = add_post(&db, author);

        let err = engine.delete_post(stranger, post).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert!(db.get_post(&post.to_string()).unwrap().is_some());
        assert!(sink.events().is_empty());

        engine.delete_post(admin, post).await.unwrap();
        assert!(db.get_post(&post.to_string()).unwrap().is_none());
        assert!(matches!(
            &sink.events()[0],
            (GatewayEvent::PostDeleted { .. }, Audience::All)
        ));
    }

    #[tokio::test]
    async fn delete_hotspot_cleans_up_joined_set() {
        let (db, _sink, engine) = setup();
        let author = add_user(&db, "author");
        let joiner = add_user(&db, "joiner");
        let hotspot = add_hotspot(&db, author);

        engine
            .toggle(joiner, hotspot, ToggleKind::HotspotJoin)
            .await
            .unwrap();
        engine.delete_hotspot(author, hotspot).await.unwrap();

        assert!(db.get_hotspot(&hotspot.to_string()).unwrap().is_none());
        assert_eq!(db.count_hotspot_members(&hotspot.to_string()).unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_user_removes_likes_and_memberships() {
        let (db, _sink, engine) = setup();
        let author = add_user(&db, "author");
        let user = add_user(&db, "leaver");
        let post = add_post(&db, author);
        let hotspot = add_hotspot(&db, author);

        engine.toggle(user, post, ToggleKind::PostLike).await.unwrap();
        engine
            .toggle(user, hotspot, ToggleKind::HotspotJoin)
            .await
            .unwrap();

        engine.purge_user(user).await.unwrap();

        assert_eq!(db.count_post_likes(&post.to_string()).unwrap(), 0);
        assert_eq!(db.count_hotspot_members(&hotspot.to_string()).unwrap(), 0);
    }
}
