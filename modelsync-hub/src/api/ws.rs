//! WebSocket endpoint for the room-based realtime feed.
//!
//! Each connection owns its room set in a local [`StreamMap`]; nothing
//! about membership survives a disconnect, so a reconnecting client
//! subscribes again from scratch. The server pings on an interval and
//! tears the connection down when the client stays silent past the
//! timeout, or when it falls far enough behind live delivery that its
//! receiver lags.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use modelsync_common::time;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

use crate::api::server::AppContext;
use crate::realtime::{is_valid_room, Broadcaster, ClientMessage, ServerMessage};

type WsSender = futures::stream::SplitSink<WebSocket, Message>;

/// GET /ws - upgrade to the realtime feed
pub async fn ws_handler(State(ctx): State<AppContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let (heartbeat_interval, heartbeat_timeout) = {
        let settings = ctx.settings.read().await;
        (settings.heartbeat_interval(), settings.heartbeat_timeout())
    };
    let broadcaster = ctx.broadcaster.clone();
    ws.on_upgrade(move |socket| {
        handle_socket(socket, broadcaster, heartbeat_interval, heartbeat_timeout)
    })
}

async fn handle_socket(
    socket: WebSocket,
    broadcaster: Arc<Broadcaster>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    let clients = broadcaster.client_connected();
    info!("WebSocket client connected ({} total)", clients);

    let (mut sender, mut receiver) = socket.split();
    let mut rooms: StreamMap<String, BroadcastStream<String>> = StreamMap::new();
    let mut last_inbound = Instant::now();
    let mut ping_tick = tokio::time::interval(heartbeat_interval);
    // The first tick completes immediately; consume it so pings start
    // one interval after connect.
    ping_tick.tick().await;

    loop {
        tokio::select! {
            Some((room, delivery)) = rooms.next(), if !rooms.is_empty() => {
                match delivery {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        warn!("Client fell {} events behind in '{}', closing", n, room);
                        break;
                    }
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        if !handle_client_message(&text, &broadcaster, &mut rooms, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_inbound = Instant::now();
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_inbound = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            _ = ping_tick.tick() => {
                if last_inbound.elapsed() > heartbeat_timeout {
                    info!("WebSocket client silent past {:?}, closing", heartbeat_timeout);
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let remaining = broadcaster.client_disconnected();
    info!("WebSocket connection closed ({} remaining)", remaining);
}

/// Apply one client message. Returns false when the connection should
/// close.
async fn handle_client_message(
    text: &str,
    broadcaster: &Broadcaster,
    rooms: &mut StreamMap<String, BroadcastStream<String>>,
    sender: &mut WsSender,
) -> bool {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(_) => {
            return send(sender, ServerMessage::Error {
                message: "unrecognized message".to_string(),
            })
            .await;
        }
    };

    match msg {
        ClientMessage::Subscribe { rooms: requested } => {
            for room in requested {
                if !is_valid_room(&room) {
                    let refused = send(sender, ServerMessage::Error {
                        message: format!("unknown room '{}'", room),
                    })
                    .await;
                    if !refused {
                        return false;
                    }
                    continue;
                }
                // Subscribing twice is idempotent and skips the re-backfill
                if rooms.contains_key(&room) {
                    if !send(sender, ServerMessage::Subscribed { room }).await {
                        return false;
                    }
                    continue;
                }

                let (backfill, rx) = broadcaster.subscribe(&room).await;
                rooms.insert(room.clone(), BroadcastStream::new(rx));
                debug!("Client subscribed to '{}'", room);

                if !send(sender, ServerMessage::Subscribed { room: room.clone() }).await {
                    return false;
                }
                if !send(sender, ServerMessage::Backfill { room, events: backfill }).await {
                    return false;
                }
            }
            true
        }
        ClientMessage::Unsubscribe { rooms: requested } => {
            for room in requested {
                rooms.remove(&room);
                debug!("Client unsubscribed from '{}'", room);
                if !send(sender, ServerMessage::Unsubscribed { room }).await {
                    return false;
                }
            }
            true
        }
        ClientMessage::Ping => {
            send(sender, ServerMessage::Pong { timestamp: time::now() }).await
        }
    }
}

async fn send(sender: &mut WsSender, msg: ServerMessage) -> bool {
    sender.send(Message::Text(msg.to_json())).await.is_ok()
}
