use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of a user. The credential hash lives in flare-db and is
/// never serialized outward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: String,
    pub bio: String,
    pub is_admin: bool,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author: UserProfile,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A feed post with its derived counts. `like_count` and `reply_count`
/// are always recomputed from the underlying sets, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub author: UserProfile,
    pub content: String,
    pub images: Vec<String>,
    pub like_count: usize,
    pub reply_count: usize,
    pub is_liked_by_user: bool,
    pub replies: Vec<Reply>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub id: Uuid,
    pub author: UserProfile,
    pub title: String,
    pub description: String,
    pub coordinates: Coordinates,
    pub joined_users: Vec<UserProfile>,
    pub joined_count: usize,
    pub is_joined_by_user: bool,
    pub created_at: DateTime<Utc>,
}

/// A direct message, or a public broadcast when `recipient_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub recipient_id: Option<Uuid>,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Derived per-partner summary. Computed on demand from the message log,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub partner: UserProfile,
    pub last_message: Message,
    pub unread_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_serialize_with_camel_case_keys() {
        let profile = UserProfile {
            id: Uuid::nil(),
            username: "tester".into(),
            avatar_url: "http://a".into(),
            bio: String::new(),
            is_admin: false,
            is_online: true,
            last_seen: DateTime::default(),
            created_at: DateTime::default(),
        };

        let value = serde_json::to_value(&profile).unwrap();
        assert!(value.get("avatarUrl").is_some());
        assert!(value.get("isOnline").is_some());
        assert!(value.get("lastSeen").is_some());
        assert!(value.get("avatar_url").is_none());

        let message = Message {
            id: Uuid::nil(),
            sender_id: Uuid::nil(),
            sender_username: "tester".into(),
            recipient_id: None,
            content: "hi".into(),
            is_read: false,
            read_at: None,
            created_at: DateTime::default(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("senderId").is_some());
        assert!(value.get("isRead").is_some());
        assert!(value.get("recipientId").is_some());
    }
}
