use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Hotspot, Message, Post, Reply, UserProfile};

/// Events sent over the WebSocket gateway.
///
/// Delivery is best-effort: a slow or disconnected subscriber is skipped,
/// never retried. Clients reconcile by re-fetching on reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A new hotspot was created
    NewHotspot { hotspot: Hotspot },

    /// A user joined or left a hotspot
    HotspotJoinUpdate {
        hotspot_id: Uuid,
        joined_users: Vec<UserProfile>,
        joined_count: usize,
        user_id: Uuid,
        action: JoinAction,
    },

    /// A hotspot was deleted by its author or an admin
    HotspotDeleted { hotspot_id: Uuid },

    /// A new post landed in the feed
    NewPost { post: Post },

    /// A user liked or unliked a post
    PostLikeUpdate {
        post_id: Uuid,
        like_count: usize,
        is_liked: bool,
        user_id: Uuid,
    },

    /// A reply was appended to a post
    NewReply { post_id: Uuid, reply: Reply },

    /// A post was deleted by its author or an admin
    PostDeleted { post_id: Uuid },

    /// A message arrived for the receiving client
    NewMessage { message: Message },

    /// Echo of a sent message back to the sender's own clients
    MessageSent { message: Message },

    /// The partner opened the conversation and marked it read
    MessagesRead {
        read_by: Uuid,
        conversation_with: Uuid,
    },

    /// Typing indicator relayed to the recipient
    UserTyping {
        user_id: Uuid,
        username: String,
        is_typing: bool,
    },

    /// A user connected to the gateway
    UserOnline {
        user_id: Uuid,
        username: String,
        is_online: bool,
    },

    /// A user disconnected from the gateway
    UserOffline {
        user_id: Uuid,
        username: String,
        is_online: bool,
        last_seen: DateTime<Utc>,
    },

    /// A user changed their avatar or bio
    UserProfileUpdate {
        user_id: Uuid,
        avatar_url: String,
        bio: String,
    },

    /// A user account was removed
    UserDeleted { user_id: Uuid },
}

/// Direction of a join toggle, as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinAction {
    Join,
    Leave,
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Started typing a direct message
    Typing { recipient_id: Uuid },

    /// Stopped typing
    StopTyping { recipient_id: Uuid },

    /// Subscribe to a post's discussion room
    JoinPostRoom { post_id: Uuid },

    /// Unsubscribe from a post's discussion room
    LeavePostRoom { post_id: Uuid },

    /// Subscribe to a hotspot's room
    JoinHotspotRoom { hotspot_id: Uuid },

    /// Unsubscribe from a hotspot's room
    LeaveHotspotRoom { hotspot_id: Uuid },
}

/// A real-time subscription scope narrower than the global audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Post(Uuid),
    Hotspot(Uuid),
}

/// Who should receive a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every connected client
    All,
    /// All connections authenticated as this user
    User(Uuid),
    /// Clients currently subscribed to the room
    Room(Room),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_and_payload_keys_are_camel_case() {
        let event = GatewayEvent::PostLikeUpdate {
            post_id: Uuid::nil(),
            like_count: 2,
            is_liked: true,
            user_id: Uuid::nil(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "postLikeUpdate");
        assert_eq!(value["data"]["postId"], Uuid::nil().to_string());
        assert_eq!(value["data"]["likeCount"], 2);
        assert_eq!(value["data"]["isLiked"], true);
        assert!(value["data"].get("like_count").is_none());

        let event = GatewayEvent::MessagesRead {
            read_by: Uuid::nil(),
            conversation_with: Uuid::nil(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "messagesRead");
        assert!(value["data"].get("readBy").is_some());
        assert!(value["data"].get("conversationWith").is_some());
    }

    #[test]
    fn join_update_payload_matches_the_client_contract() {
        let event = GatewayEvent::HotspotJoinUpdate {
            hotspot_id: Uuid::nil(),
            joined_users: vec![],
            joined_count: 0,
            user_id: Uuid::nil(),
            action: JoinAction::Leave,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "hotspotJoinUpdate");
        assert!(value["data"].get("hotspotId").is_some());
        assert!(value["data"].get("joinedUsers").is_some());
        assert_eq!(value["data"]["joinedCount"], 0);
        assert_eq!(value["data"]["action"], "leave");
    }

    #[test]
    fn commands_parse_from_the_tagged_wire_shape() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"joinPostRoom","data":{"postId":"00000000-0000-0000-0000-000000000000"}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, GatewayCommand::JoinPostRoom { post_id } if post_id == Uuid::nil()));

        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"typing","data":{"recipientId":"00000000-0000-0000-0000-000000000000"}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, GatewayCommand::Typing { .. }));
    }
}
