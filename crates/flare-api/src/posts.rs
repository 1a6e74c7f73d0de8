use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use flare_core::{EventSink, ToggleKind};
use flare_db::format_timestamp;
use flare_db::models::{PostRow, ReplyRow, UserRow, parse_timestamp, parse_uuid};
use flare_types::api::{
    Claims, CreatePostRequest, LikeIntent, LikeRequest, LikeResponse, PostFeedResponse,
    ReplyRequest,
};
use flare_types::events::{Audience, GatewayEvent};
use flare_types::models::{Post, Reply};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::validate;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

pub async fn get_posts(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.clamp(1, 100);
    let page = query.page.max(1);
    let offset = (page - 1).saturating_mul(limit);

    let rows = state.db.list_posts(limit, offset)?;
    let post_ids: Vec<String> = rows.iter().map(|(p, _)| p.id.clone()).collect();
    let replies = state.db.replies_for_posts(&post_ids)?;
    let likes = state.db.likes_for_posts(&post_ids)?;

    let posts = assemble_posts(rows, replies, likes, claims.sub);

    let total = state.db.count_posts()?;
    Ok(Json(PostFeedResponse {
        posts,
        current_page: page,
        total_pages: total.div_ceil(limit),
    }))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate::text_length("content", &req.content, 1, 2000)?;
    let images = req.images.unwrap_or_default();
    for url in &images {
        validate::text_length("images", url, 1, 2048)?;
    }

    let author = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user"))?;

    let post_id = Uuid::new_v4();
    let now = Utc::now();
    let images_json =
        serde_json::to_string(&images).map_err(|e| anyhow::anyhow!("encode images: {}", e))?;

    state.db.insert_post(
        &post_id.to_string(),
        &claims.sub.to_string(),
        &req.content,
        &images_json,
        &format_timestamp(now),
    )?;

    let post = Post {
        id: post_id,
        author: author.into_profile(),
        content: req.content,
        images,
        like_count: 0,
        reply_count: 0,
        is_liked_by_user: false,
        replies: vec![],
        created_at: now,
    };

    state.dispatcher.publish(
        GatewayEvent::NewPost { post: post.clone() },
        Audience::All,
    );

    Ok((StatusCode::CREATED, Json(post)))
}

/// Like/unlike toggle. An explicit `intent` in the body makes the call
/// retry-safe; without one this is the legacy bare toggle.
pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<LikeRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let intent = body.and_then(|Json(req)| req.intent);

    let outcome = match intent {
        Some(LikeIntent::Like) => {
            state
                .engine
                .set_membership(claims.sub, post_id, ToggleKind::PostLike, true)
                .await?
        }
        Some(LikeIntent::Unlike) => {
            state
                .engine
                .set_membership(claims.sub, post_id, ToggleKind::PostLike, false)
                .await?
        }
        None => {
            state
                .engine
                .toggle(claims.sub, post_id, ToggleKind::PostLike)
                .await?
        }
    };

    Ok(Json(LikeResponse {
        is_liked: outcome.new_state,
        like_count: outcome.count,
    }))
}

pub async fn add_reply(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate::text_length("content", &req.content, 1, 1000)?;

    if state.db.get_post(&post_id.to_string())?.is_none() {
        return Err(ApiError::NotFound("post"));
    }
    let author = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::NotFound("user"))?;

    let reply_id = Uuid::new_v4();
    let now = Utc::now();

    state.db.insert_reply(
        &reply_id.to_string(),
        &post_id.to_string(),
        &claims.sub.to_string(),
        &req.content,
        &format_timestamp(now),
    )?;

    let reply = Reply {
        id: reply_id,
        post_id,
        author: author.into_profile(),
        content: req.content,
        created_at: now,
    };

    state.dispatcher.publish(
        GatewayEvent::NewReply {
            post_id,
            reply: reply.clone(),
        },
        Audience::All,
    );

    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_post(claims.sub, post_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

fn assemble_posts(
    rows: Vec<(PostRow, UserRow)>,
    replies: Vec<(ReplyRow, UserRow)>,
    likes: Vec<(String, String)>,
    viewer: Uuid,
) -> Vec<Post> {
    let mut replies_by_post: HashMap<String, Vec<Reply>> = HashMap::new();
    for (row, author) in replies {
        let post_id = row.post_id.clone();
        replies_by_post
            .entry(post_id)
            .or_default()
            .push(row.into_reply(author.into_profile()));
    }

    let mut likes_by_post: HashMap<String, HashSet<String>> = HashMap::new();
    for (post_id, user_id) in likes {
        likes_by_post.entry(post_id).or_default().insert(user_id);
    }

    let viewer_id = viewer.to_string();

    rows.into_iter()
        .map(|(post, author)| {
            let replies = replies_by_post.remove(&post.id).unwrap_or_default();
            let like_set = likes_by_post.remove(&post.id).unwrap_or_default();
            let images = post.images();
            Post {
                id: parse_uuid(&post.id, "post id"),
                author: author.into_profile(),
                content: post.content,
                images,
                like_count: like_set.len(),
                reply_count: replies.len(),
                is_liked_by_user: like_set.contains(&viewer_id),
                replies,
                created_at: parse_timestamp(&post.created_at),
            }
        })
        .collect()
}
