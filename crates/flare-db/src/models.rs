//! Database row types — these map directly to SQLite rows.
//! Distinct from the flare-types API models to keep the DB layer
//! independent; `into_*` converters bridge the two.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use flare_types::models::{Coordinates, Message, Reply, UserProfile};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub avatar_url: String,
    pub bio: String,
    pub is_admin: bool,
    pub is_online: bool,
    pub last_seen: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            id: parse_uuid(&self.id, "user id"),
            username: self.username,
            avatar_url: self.avatar_url,
            bio: self.bio,
            is_admin: self.is_admin,
            is_online: self.is_online,
            last_seen: parse_timestamp(&self.last_seen),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub images: String,
    pub created_at: String,
}

impl PostRow {
    pub fn images(&self) -> Vec<String> {
        serde_json::from_str(&self.images).unwrap_or_else(|e| {
            warn!("Corrupt images column on post '{}': {}", self.id, e);
            Vec::new()
        })
    }
}

pub struct ReplyRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
}

impl ReplyRow {
    pub fn into_reply(self, author: UserProfile) -> Reply {
        Reply {
            id: parse_uuid(&self.id, "reply id"),
            post_id: parse_uuid(&self.post_id, "reply post_id"),
            author,
            content: self.content,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

pub struct HotspotRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: String,
}

impl HotspotRow {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub recipient_id: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: parse_uuid(&self.id, "message id"),
            sender_id: parse_uuid(&self.sender_id, "message sender_id"),
            sender_username: self.sender_username.unwrap_or_else(|| "unknown".to_string()),
            recipient_id: self
                .recipient_id
                .as_deref()
                .map(|r| parse_uuid(r, "message recipient_id")),
            content: self.content,
            is_read: self.is_read,
            read_at: self.read_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

pub fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Tolerate bare "YYYY-MM-DD HH:MM:SS" from hand-edited rows.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
