use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use flare_api::auth::{self, AppState, AppStateInner};
use flare_api::middleware::require_auth;
use flare_api::{hotspots, messages, posts, users};
use flare_core::{ConversationAggregator, ToggleEngine};
use flare_gateway::connection;
use flare_gateway::dispatcher::Dispatcher;
use flare_types::api::Claims;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flare=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("FLARE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("FLARE_DB_PATH").unwrap_or_else(|_| "flare.db".into());
    let host = std::env::var("FLARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("FLARE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(flare_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state. The dispatcher doubles as the engine's event sink, so
    // membership updates fan out from inside the per-target critical
    // section.
    let dispatcher = Dispatcher::new();
    let engine = Arc::new(ToggleEngine::new(
        db.clone(),
        Arc::new(dispatcher.clone()),
    ));
    let conversations = ConversationAggregator::new(db.clone());

    let state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        conversations,
        dispatcher,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/profile", put(users::update_profile))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}", delete(users::delete_user))
        .route("/posts", get(posts::get_posts).post(posts::create_post))
        .route("/posts/{post_id}", delete(posts::delete_post))
        .route("/posts/{post_id}/like", post(posts::toggle_like))
        .route("/posts/{post_id}/reply", post(posts::add_reply))
        .route(
            "/hotspots",
            get(hotspots::get_hotspots).post(hotspots::create_hotspot),
        )
        .route("/hotspots/{hotspot_id}", delete(hotspots::delete_hotspot))
        .route("/hotspots/{hotspot_id}/join", post(hotspots::toggle_join))
        .route("/messages/send", post(messages::send_message))
        .route("/messages/conversations", get(messages::get_conversations))
        .route(
            "/messages/conversation/{user_id}",
            get(messages::get_conversation),
        )
        .route("/messages/read/{user_id}", put(messages::mark_read))
        .route(
            "/messages/{message_id}",
            delete(messages::delete_message),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let ws_route = Router::new().route("/gateway", get(ws_upgrade));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Flare server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

/// The gateway authenticates at the HTTP upgrade: a bad token is rejected
/// before the WebSocket handshake completes, so the connection handler
/// only ever sees authenticated users.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let claims = match decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(token_data) => token_data.claims,
        Err(e) => {
            warn!("Gateway upgrade rejected: {}", e);
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            claims.sub,
            claims.username,
        )
    })
    .into_response()
}
