//! Real-time distribution over WebSocket rooms

pub mod broadcaster;
pub mod messages;

pub use broadcaster::{is_valid_room, rooms_for, spawn_event_bridge, Broadcaster, GLOBAL_ROOM};
pub use messages::{ClientMessage, ServerMessage};
