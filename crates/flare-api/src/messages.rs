use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use flare_core::EventSink;
use flare_db::format_timestamp;
use flare_types::api::{Claims, MarkReadResponse, SendMessageRequest, SendMessageResponse};
use flare_types::events::{Audience, GatewayEvent};
use flare_types::models::Message;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::validate;

pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.conversations.list(claims.sub)?;
    Ok(Json(conversations))
}

/// Full two-party thread, oldest first. Fetching a conversation does NOT
/// mark it read — clients call the explicit read endpoint once the
/// messages are actually on screen.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.get_user_by_id(&user_id.to_string())?.is_none() {
        return Err(ApiError::NotFound("user"));
    }

    let messages: Vec<Message> = state
        .db
        .messages_between(&claims.sub.to_string(), &user_id.to_string())?
        .into_iter()
        .map(|row| row.into_message())
        .collect();

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate::text_length("content", &req.content, 1, 1000)?;

    if let Some(recipient_id) = req.recipient_id {
        if state
            .db
            .get_user_by_id(&recipient_id.to_string())?
            .is_none()
        {
            return Err(ApiError::NotFound("recipient"));
        }
    }

    let message_id = Uuid::new_v4();
    let now = Utc::now();
    let recipient = req.recipient_id.map(|r| r.to_string());

    state.db.insert_message(
        &message_id.to_string(),
        &claims.sub.to_string(),
        recipient.as_deref(),
        &req.content,
        &format_timestamp(now),
    )?;

    let message = Message {
        id: message_id,
        sender_id: claims.sub,
        sender_username: claims.username.clone(),
        recipient_id: req.recipient_id,
        content: req.content,
        is_read: false,
        read_at: None,
        created_at: now,
    };

    match req.recipient_id {
        Some(recipient_id) => {
            state.dispatcher.publish(
                GatewayEvent::NewMessage {
                    message: message.clone(),
                },
                Audience::User(recipient_id),
            );
            // Echo to the sender's other devices.
            state.dispatcher.publish(
                GatewayEvent::MessageSent {
                    message: message.clone(),
                },
                Audience::User(claims.sub),
            );
        }
        None => {
            state.dispatcher.publish(
                GatewayEvent::NewMessage {
                    message: message.clone(),
                },
                Audience::All,
            );
        }
    }

    Ok((StatusCode::CREATED, Json(SendMessageResponse { message })))
}

/// Sender-or-admin only. No fan-out — deletion is not part of the
/// real-time event vocabulary; clients pick it up on re-fetch.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .db
        .get_message(&message_id.to_string())?
        .ok_or(ApiError::NotFound("message"))?;

    if message.sender_id != claims.sub.to_string() {
        let actor = state
            .db
            .get_user_by_id(&claims.sub.to_string())?
            .ok_or(ApiError::NotFound("user"))?;
        if !actor.is_admin {
            return Err(ApiError::Forbidden(
                "not authorized to delete this message".into(),
            ));
        }
    }

    state.db.delete_message(&message_id.to_string())?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Explicit bulk read transition for everything `user_id` sent us.
/// Idempotent: a repeat call reports zero updates and emits no receipt.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.get_user_by_id(&user_id.to_string())?.is_none() {
        return Err(ApiError::NotFound("user"));
    }

    let updated_count = state.engine.mark_read(claims.sub, user_id).await?;
    Ok(Json(MarkReadResponse { updated_count }))
}
