use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use flare_db::Database;
use flare_db::models::MessageRow;
use flare_types::models::ConversationSummary;

use crate::error::CoreError;

/// Read-side projection of the message log into per-partner summaries.
///
/// Pure read: never flips read flags — marking-as-read is the explicit
/// engine operation, not a side effect of listing.
pub struct ConversationAggregator {
    db: Arc<Database>,
}

impl ConversationAggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// One summary per conversation partner: the most recent message and
    /// the count of unread messages addressed to `user_id`. Ordered by
    /// last-message timestamp descending, partner id as tiebreak.
    /// Partners deleted concurrently are skipped rather than failing the
    /// whole listing.
    pub fn list(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>, CoreError> {
        let uid = user_id.to_string();
        let rows = self.db.direct_messages_for_user(&uid)?;

        // Rows arrive newest-first, so the first row seen per partner is
        // that conversation's last message.
        let mut grouped: Vec<(String, MessageRow, usize)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let partner_id = if row.sender_id == uid {
                match &row.recipient_id {
                    Some(recipient) => recipient.clone(),
                    None => continue,
                }
            } else {
                row.sender_id.clone()
            };

            let unread = (row.recipient_id.as_deref() == Some(uid.as_str()) && !row.is_read)
                as usize;

            match index.get(&partner_id) {
                Some(&i) => grouped[i].2 += unread,
                None => {
                    index.insert(partner_id.clone(), grouped.len());
                    grouped.push((partner_id, row, unread));
                }
            }
        }

        let mut conversations = Vec::with_capacity(grouped.len());
        for (partner_id, last_row, unread_count) in grouped {
            let Some(partner) = self.db.get_user_by_id(&partner_id)? else {
                // Partner account deleted since the messages were sent.
                continue;
            };
            conversations.push(ConversationSummary {
                partner: partner.into_profile(),
                last_message: last_row.into_message(),
                unread_count,
            });
        }

        conversations.sort_by(|a, b| {
            b.last_message
                .created_at
                .cmp(&a.last_message.created_at)
                .then_with(|| a.partner.id.cmp(&b.partner.id))
        });

        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{add_user, setup};
    use chrono::{Duration, Utc};
    use flare_db::format_timestamp;

    fn send(db: &Database, from: Uuid, to: Uuid, content: &str, offset_secs: i64) {
        let ts = format_timestamp(Utc::now() + Duration::seconds(offset_secs));
        db.insert_message(
            &Uuid::new_v4().to_string(),
            &from.to_string(),
            Some(&to.to_string()),
            content,
            &ts,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn conversations_ordered_by_latest_message_descending() {
        let (db, _sink, _engine) = setup();
        let me = add_user(&db, "me");
        let early = add_user(&db, "early");
        let middle = add_user(&db, "middle");
        let late = add_user(&db, "late");

        send(&db, early, me, "t1", -30);
        send(&db, middle, me, "t2", -20);
        send(&db, late, me, "t3", -10);

        let aggregator = ConversationAggregator::new(db.clone());
        let conversations = aggregator.list(me).unwrap();

        let partners: Vec<Uuid> = conversations.iter().map(|c| c.partner.id).collect();
        assert_eq!(partners, vec![late, middle, early]);
    }

    #[tokio::test]
    async fn unread_counts_follow_explicit_mark_read() {
        let (db, _sink, engine) = setup();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        send(&db, alice, bob, "one", -3);
        send(&db, alice, bob, "two", -2);
        send(&db, alice, bob, "three", -1);

        let aggregator = ConversationAggregator::new(db.clone());

        let before = aggregator.list(bob).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].unread_count, 3);
        assert_eq!(before[0].last_message.content, "three");

        // Listing alone must not consume unread state.
        let again = aggregator.list(bob).unwrap();
        assert_eq!(again[0].unread_count, 3);

        assert_eq!(engine.mark_read(bob, alice).await.unwrap(), 3);

        let after = aggregator.list(bob).unwrap();
        assert_eq!(after[0].unread_count, 0);
    }

    #[tokio::test]
    async fn own_unread_messages_do_not_count_for_sender() {
        let (db, _sink, _engine) = setup();
        let alice = add_user(&db, "alice");
        let bob = add_user(&db, "bob");

        send(&db, alice, bob, "hi", -2);
        send(&db, bob, alice, "hey", -1);

        let aggregator = ConversationAggregator::new(db.clone());

        let alices = aggregator.list(alice).unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].unread_count, 1); // only bob's reply

        let bobs = aggregator.list(bob).unwrap();
        assert_eq!(bobs[0].unread_count, 1); // only alice's opener
    }

    #[tokio::test]
    async fn deleted_partner_is_skipped() {
        let (db, _sink, _engine) = setup();
        let me = add_user(&db, "me");
        let ghost = add_user(&db, "ghost");
        let friend = add_user(&db, "friend");

        send(&db, ghost, me, "boo", -2);
        send(&db, friend, me, "hello", -1);
        db.delete_user(&ghost.to_string()).unwrap();

        let aggregator = ConversationAggregator::new(db.clone());
        let conversations = aggregator.list(me).unwrap();

        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].partner.id, friend);
    }

    #[tokio::test]
    async fn tie_on_timestamp_breaks_by_partner_id() {
        let (db, _sink, _engine) = setup();
        let me = add_user(&db, "me");
        let a = add_user(&db, "aaa");
        let b = add_user(&db, "bbb");

        let ts = format_timestamp(Utc::now());
        for partner in [a, b] {
            db.insert_message(
                &Uuid::new_v4().to_string(),
                &partner.to_string(),
                Some(&me.to_string()),
                "same instant",
                &ts,
            )
            .unwrap();
        }

        let aggregator = ConversationAggregator::new(db.clone());
        let conversations = aggregator.list(me).unwrap();
        assert_eq!(conversations.len(), 2);

        let (first, second) = (conversations[0].partner.id, conversations[1].partner.id);
        assert!(first < second);
    }
}
