use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use flare_core::{EventSink, ToggleKind};
use flare_db::format_timestamp;
use flare_db::models::{parse_timestamp, parse_uuid};
use flare_types::api::{
    Claims, CreateHotspotRequest, JoinIntent, JoinRequest, JoinResponse,
};
use flare_types::events::{Audience, GatewayEvent};
use flare_types::models::{Hotspot, UserProfile};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::validate;

pub async fn get_hotspots(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.db.list_hotspots()?;
    let hotspot_ids: Vec<String> = rows.iter().map(|(h, _)| h.id.clone()).collect();

    let mut members_by_hotspot: HashMap<String, Vec<UserProfile>> = HashMap::new();
    for (hotspot_id, member) in state.db.members_for_hotspots(&hotspot_ids)? {
        members_by_hotspot
            .entry(hotspot_id)
            .or_default()
            .push(member.into_profile());
    }

    let hotspots: Vec<Hotspot> = rows
        .into_iter()
        .map(|(row, author)| {
            let joined_users = members_by_hotspot.remove(&row.id).unwrap_or_default();
            let coordinates = row.coordinates();
            Hotspot {
                id: parse_uuid(&row.id, "hotspot id"),
                author: author.into_profile(),
                title: row.title,
                description: row.description,
                coordinates,
                is_joined_by_user: joined_users.iter().any(|u| u.id == claims.sub),
                joined_count: joined_users.len(),
                joined_users,
                created_at: parse_timestamp(&row.created_at),
            }
        })
        .collect();

    Ok(Json(hotspots))
}

pub async fn create_hotspot(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateHotspotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate::text_length("title", &req.title, 1, 100)?;
    validate::text_length("description", &req.description, 1, 1000)?;
    validate::coordinate("latitude", req.coordinates.latitude, -90.0, 90.0)?;
    validate::coordinate("longitude", req.coordinates.longitude, -180.0, 180.0)?;

    let author = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user"))?;

    let hotspot_id = Uuid::new_v4();
    let now = Utc::now();

    state.db.insert_hotspot(
        &hotspot_id.to_string(),
        &claims.sub.to_string(),
        &req.title,
        &req.description,
        req.coordinates.latitude,
        req.coordinates.longitude,
        &format_timestamp(now),
    )?;

    let hotspot = Hotspot {
        id: hotspot_id,
        author: author.into_profile(),
        title: req.title,
        description: req.description,
        coordinates: req.coordinates,
        joined_users: vec![],
        joined_count: 0,
        is_joined_by_user: false,
        created_at: now,
    };

    state.dispatcher.publish(
        GatewayEvent::NewHotspot {
            hotspot: hotspot.clone(),
        },
        Audience::All,
    );

    Ok((StatusCode::CREATED, Json(hotspot)))
}

/// Join/leave toggle. An explicit `intent` in the body makes the call
/// retry-safe; without one this is the legacy bare toggle.
pub async fn toggle_join(
    State(state): State<AppState>,
    Path(hotspot_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<JoinRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let intent = body.and_then(|Json(req)| req.intent);

    let outcome = match intent {
        Some(JoinIntent::Join) => {
            state
                .engine
                .set_membership(claims.sub, hotspot_id, ToggleKind::HotspotJoin, true)
                .await?
        }
        Some(JoinIntent::Leave) => {
            state
                .engine
                .set_membership(claims.sub, hotspot_id, ToggleKind::HotspotJoin, false)
                .await?
        }
        None => {
            state
                .engine
                .toggle(claims.sub, hotspot_id, ToggleKind::HotspotJoin)
                .await?
        }
    };

    Ok(Json(JoinResponse {
        is_joined: outcome.new_state,
        joined_count: outcome.count,
        joined_users: outcome.members,
    }))
}

pub async fn delete_hotspot(
    State(state): State<AppState>,
    Path(hotspot_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_hotspot(claims.sub, hotspot_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
