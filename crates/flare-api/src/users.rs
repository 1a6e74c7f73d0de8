use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use flare_core::EventSink;
use flare_types::api::{Claims, UpdateProfileRequest};
use flare_types::events::{Audience, GatewayEvent};
use flare_types::models::UserProfile;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::validate;

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let users: Vec<UserProfile> = state
        .db
        .list_users()?
        .into_iter()
        .map(|row| row.into_profile())
        .collect();
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user.into_profile()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(bio) = &req.bio {
        validate::text_length("bio", bio, 0, 500)?;
    }
    if let Some(avatar_url) = &req.avatar_url {
        validate::text_length("avatar_url", avatar_url, 0, 2048)?;
    }

    let current = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user"))?;

    let avatar_url = req.avatar_url.unwrap_or(current.avatar_url);
    let bio = req.bio.unwrap_or(current.bio);

    if !state
        .db
        .update_profile(&claims.sub.to_string(), &avatar_url, &bio)?
    {
        return Err(ApiError::NotFound("user"));
    }

    state.dispatcher.publish(
        GatewayEvent::UserProfileUpdate {
            user_id: claims.sub,
            avatar_url: avatar_url.clone(),
            bio: bio.clone(),
        },
        Audience::All,
    );

    let updated = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(updated.into_profile()))
}

/// Self-deletion or admin deletion. Admins cannot be deleted by anyone
/// but themselves.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user"))?;

    let target = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or(ApiError::NotFound("user"))?;

    let is_self = claims.sub == user_id;
    if !is_self && !actor.is_admin {
        return Err(ApiError::Forbidden("admin access required".into()));
    }
    if target.is_admin && !is_self {
        return Err(ApiError::Forbidden("cannot delete other admin users".into()));
    }

    // Scrub the user out of every like/joined set through the engine's
    // serialized path before removing the account itself.
    state.engine.purge_user(user_id).await?;
    state.db.delete_user(&user_id.to_string())?;

    state
        .dispatcher
        .publish(GatewayEvent::UserDeleted { user_id }, Audience::All);

    Ok(Json(serde_json::json!({ "deleted": true })))
}
