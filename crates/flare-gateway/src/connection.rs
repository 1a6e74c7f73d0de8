use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use flare_db::{Database, format_timestamp};
use flare_types::events::{GatewayCommand, GatewayEvent, Room};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so we go straight to Ready plus
/// the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Register the targeted channel, then replay who is already online so
    // the client starts from a consistent presence view.
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id);

    for (uid, uname) in dispatcher.online_users() {
        let event = GatewayEvent::UserOnline {
            user_id: uid,
            username: uname,
            is_online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    // Flip presence in the store first, then announce — subscribers must
    // never hear about state that is not yet durable.
    if let Err(e) = db.set_presence(&user_id.to_string(), true, &format_timestamp(Utc::now())) {
        warn!("Failed to persist online presence for {}: {}", user_id, e);
    }
    dispatcher.user_online(user_id, username.clone());

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&dispatcher_recv, user_id, &username_recv, cmd),
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate_for_log(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let last_seen = Utc::now();
    if dispatcher.user_offline(user_id, conn_id, last_seen) {
        // Only the connection that still owns the user channel writes the
        // offline flag — a stale close after a reconnect must not mark a
        // live session offline.
        if let Err(e) = db.set_presence(&user_id.to_string(), false, &format_timestamp(last_seen))
        {
            warn!("Failed to persist offline presence for {}: {}", user_id, e);
        }
    }
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).expect("gateway event serializes");
    sender.send(Message::Text(text.into())).await
}

/// Cap unparseable input at 200 characters for the log line, cutting on
/// a char boundary — a byte-indexed slice would panic mid-codepoint.
fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn handle_command(dispatcher: &Dispatcher, user_id: Uuid, username: &str, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Typing { recipient_id } => {
            dispatcher.send_to_user(
                recipient_id,
                GatewayEvent::UserTyping {
                    user_id,
                    username: username.to_string(),
                    is_typing: true,
                },
            );
        }

        GatewayCommand::StopTyping { recipient_id } => {
            dispatcher.send_to_user(
                recipient_id,
                GatewayEvent::UserTyping {
                    user_id,
                    username: username.to_string(),
                    is_typing: false,
                },
            );
        }

        GatewayCommand::JoinPostRoom { post_id } => {
            dispatcher.join_room(user_id, Room::Post(post_id));
        }

        GatewayCommand::LeavePostRoom { post_id } => {
            dispatcher.leave_room(user_id, Room::Post(post_id));
        }

        GatewayCommand::JoinHotspotRoom { hotspot_id } => {
            dispatcher.join_room(user_id, Room::Hotspot(hotspot_id));
        }

        GatewayCommand::LeaveHotspotRoom { hotspot_id } => {
            dispatcher.leave_room(user_id, Room::Hotspot(hotspot_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_garbage_is_truncated_on_a_char_boundary() {
        // 199 ASCII bytes then a two-byte char straddling the cutoff.
        let mut garbage = "x".repeat(199);
        garbage.push('é');
        garbage.push_str(&"y".repeat(50));

        let logged = truncate_for_log(&garbage);
        assert_eq!(logged.chars().count(), 200);
        assert!(logged.ends_with('é'));

        let short = "tiny";
        assert_eq!(truncate_for_log(short), short);
    }
}
