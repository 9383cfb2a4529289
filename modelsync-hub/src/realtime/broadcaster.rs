//! Room-based event fan-out for WebSocket clients.
//!
//! Rooms are created on first use and keyed by name: `status:global`
//! carries every event, `model:<id>` and `provider:<id>` carry the
//! change events for one model or provider. Each room keeps a ring
//! buffer of its most recent events so a newly subscribed client can be
//! backfilled, and a broadcast channel for live delivery. Subscriber
//! identity lives entirely in the connection task; the registry holds
//! no per-client state, so a reconnecting client starts from scratch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use modelsync_common::events::{EventBus, SyncEvent};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::ServerMessage;

/// Room receiving every event regardless of entity.
pub const GLOBAL_ROOM: &str = "status:global";

/// Rooms an event is routed to.
///
/// Model change events fan out to their model room, their provider
/// room, and the global room; everything else is global-only.
pub fn rooms_for(event: &SyncEvent) -> Vec<String> {
    match event {
        SyncEvent::ModelCreated {
            entity_id,
            provider_id,
            ..
        }
        | SyncEvent::ModelUpdated {
            entity_id,
            provider_id,
            ..
        } => vec![
            GLOBAL_ROOM.to_string(),
            format!("model:{}", entity_id),
            format!("provider:{}", provider_id),
        ],
        _ => vec![GLOBAL_ROOM.to_string()],
    }
}

/// True for room names a client may subscribe to.
pub fn is_valid_room(name: &str) -> bool {
    if name == GLOBAL_ROOM {
        return true;
    }
    matches!(name.split_once(':'), Some(("model" | "provider", id)) if !id.is_empty())
}

struct RoomState {
    tx: broadcast::Sender<String>,
    history: Mutex<VecDeque<Value>>,
}

impl RoomState {
    fn new(queue_size: usize) -> Self {
        let (tx, _) = broadcast::channel(queue_size.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::new()),
        }
    }
}

/// Registry of rooms plus a connection counter for the status endpoints.
pub struct Broadcaster {
    rooms: DashMap<String, Arc<RoomState>>,
    history_size: usize,
    queue_size: usize,
    connections: AtomicUsize,
}

impl Broadcaster {
    /// `history_size` bounds each room's backfill buffer. `queue_size`
    /// bounds how far one subscriber may fall behind live delivery;
    /// a receiver past that limit observes a lag error, which the
    /// connection task treats as cause for teardown.
    pub fn new(history_size: usize, queue_size: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            history_size,
            queue_size,
            connections: AtomicUsize::new(0),
        }
    }

    fn room(&self, name: &str) -> Arc<RoomState> {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RoomState::new(self.queue_size)))
            .clone()
    }

    /// Route one event into its rooms, returning how many subscribers
    /// received it live. The event lands in each room's history even
    /// when nobody is listening, so later subscribers can be backfilled.
    pub async fn publish(&self, event: &SyncEvent) -> usize {
        let value = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize event for broadcast: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for room_name in rooms_for(event) {
            let room = self.room(&room_name);
            {
                let mut history = room.history.lock().await;
                history.push_back(value.clone());
                while history.len() > self.history_size {
                    history.pop_front();
                }
            }
            let envelope = ServerMessage::Event {
                room: room_name,
                event: value.clone(),
            };
            delivered += room.tx.send(envelope.to_json()).unwrap_or(0);
        }
        delivered
    }

    /// Join a room: the backfill snapshot (oldest first) plus a live
    /// receiver.
    ///
    /// The receiver is attached before the history is copied, so an
    /// event racing the subscription shows up twice rather than not at
    /// all.
    pub async fn subscribe(&self, room_name: &str) -> (Vec<Value>, broadcast::Receiver<String>) {
        let room = self.room(room_name);
        let rx = room.tx.subscribe();
        let history = room.history.lock().await.iter().cloned().collect();
        (history, rx)
    }

    pub fn client_connected(&self) -> usize {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn client_disconnected(&self) -> usize {
        self.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub fn client_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

/// Forward every bus event into the room registry until shutdown.
pub fn spawn_event_bridge(
    events: &EventBus,
    broadcaster: Arc<Broadcaster>,
    shutdown: CancellationToken,
) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Event bridge stopped");
                    break;
                }
                msg = rx.recv() => match msg {
                    Ok(event) => {
                        broadcaster.publish(&event).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event bridge lagged, {} events dropped", n);
                    }
                }
            }
        }
    });
}
