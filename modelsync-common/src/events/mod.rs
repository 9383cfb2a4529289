//! Event types for the ModelSync event system
//!
//! Provides shared event definitions and the EventBus used by the hub to fan
//! state changes out to the realtime channel and the SSE mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// ModelSync event types
///
/// Events are broadcast via EventBus and can be serialized for realtime
/// (WebSocket) and SSE transmission. All state changes flow through this
/// central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A new model record entered the canonical store
    ///
    /// Triggers:
    /// - Realtime: broadcast to `model:<entity_id>` and `status:global` rooms
    /// - SSE: update dashboards
    ModelCreated {
        /// Normalized entity id (slug)
        entity_id: String,
        /// Provider slug the record belongs to
        provider_id: String,
        /// Human-readable name as observed upstream
        display_name: String,
        /// When the record was created
        timestamp: DateTime<Utc>,
    },

    /// One or more fields of an existing record changed after reconciliation
    ///
    /// Triggers:
    /// - Realtime: broadcast to `model:<entity_id>` and `status:global` rooms
    /// - SSE: update dashboards
    ModelUpdated {
        /// Normalized entity id (slug)
        entity_id: String,
        /// Provider slug the record belongs to
        provider_id: String,
        /// Names of the fields whose winning value changed
        changed_fields: Vec<String>,
        /// When the change was applied
        timestamp: DateTime<Utc>,
    },

    /// A sync run finished and the canonical store is up to date
    ///
    /// Triggers:
    /// - Realtime: broadcast to `status:global` room
    /// - Cache: invalidate model keys so reads see fresh data
    SyncCompleted {
        /// Records seen in this run
        records_total: usize,
        /// Records newly created
        records_created: usize,
        /// Records with at least one changed field
        records_updated: usize,
        /// Quality label for the run ("complete", "partial", "fallback")
        data_quality: String,
        /// Wall-clock duration of the run in milliseconds
        duration_ms: u64,
        /// When the run finished
        timestamp: DateTime<Utc>,
    },

    /// A sync run failed end to end (upstream unreachable, extraction empty)
    ///
    /// Triggers:
    /// - Realtime: broadcast to `status:global` room
    /// - Scheduler: counts toward the task's consecutive error total
    SyncFailed {
        /// Why the run failed
        reason: String,
        /// Consecutive failures for the owning task, this one included
        consecutive_errors: u32,
        /// When the failure was recorded
        timestamp: DateTime<Utc>,
    },

    /// A scheduled task crossed its error threshold and stopped scheduling
    ///
    /// Triggers:
    /// - Realtime: broadcast to `status:global` room
    /// - Admin UI: surface the disabled task for manual re-enable
    TaskDisabled {
        /// Task name ("model-sync", "health-check", "cache-cleanup")
        task: String,
        /// Consecutive failures that tripped the threshold
        consecutive_errors: u32,
        /// When the task was disabled
        timestamp: DateTime<Utc>,
    },

    /// A disabled task was re-armed by an operator
    ///
    /// Triggers:
    /// - Realtime: broadcast to `status:global` room
    TaskEnabled {
        /// Task name that was re-armed
        task: String,
        /// When the task was re-enabled
        timestamp: DateTime<Utc>,
    },

    /// Cache entries matching a pattern were dropped
    ///
    /// Triggers:
    /// - SSE: developer visibility into cache churn
    CacheInvalidated {
        /// Glob-style pattern that was applied ("models:*")
        pattern: String,
        /// Number of entries removed
        entries_removed: usize,
        /// When invalidation ran
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::ModelCreated { .. } => "ModelCreated",
            SyncEvent::ModelUpdated { .. } => "ModelUpdated",
            SyncEvent::SyncCompleted { .. } => "SyncCompleted",
            SyncEvent::SyncFailed { .. } => "SyncFailed",
            SyncEvent::TaskDisabled { .. } => "TaskDisabled",
            SyncEvent::TaskEnabled { .. } => "TaskEnabled",
            SyncEvent::CacheInvalidated { .. } => "CacheInvalidated",
        }
    }

    /// Entity id the event concerns, if it is scoped to a single record
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            SyncEvent::ModelCreated { entity_id, .. } => Some(entity_id),
            SyncEvent::ModelUpdated { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for application-wide events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use modelsync_common::events::{EventBus, SyncEvent};
/// use std::sync::Arc;
///
/// let event_bus = Arc::new(EventBus::new(100));
///
/// // Subscribe to events
/// let mut rx = event_bus.subscribe();
///
/// // Emit an event
/// event_bus.emit(SyncEvent::TaskEnabled {
///     task: "model-sync".to_string(),
///     timestamp: chrono::Utc::now(),
/// }).ok();
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use modelsync_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// This is useful for non-critical events where it's acceptable if
    /// no component is currently listening.
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    ///
    /// Useful for debugging and monitoring
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> SyncEvent {
        SyncEvent::ModelUpdated {
            entity_id: "gpt-4o".to_string(),
            provider_id: "openai".to_string(),
            changed_fields: vec!["output_speed".to_string()],
            timestamp: chrono::Utc::now(),
        }
    }

    /// Verifies EventBus::new() creates a bus with the requested capacity
    /// and no subscribers.
    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    /// Verifies EventBus::subscribe() registers receivers.
    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(10);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    /// Verifies EventBus::emit() delivers events to subscribers.
    #[test]
    fn test_eventbus_emit() {
        use std::sync::Arc;
        let bus = Arc::new(EventBus::new(10));
        let mut rx = bus.subscribe();

        bus.emit(sample_update()).expect("emit should succeed");

        let received = rx.try_recv().expect("Should receive event");
        assert_eq!(received.event_type(), "ModelUpdated");
        assert_eq!(received.entity_id(), Some("gpt-4o"));
    }

    /// Verifies EventBus::emit() errors when nobody is listening.
    #[test]
    fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(sample_update()).is_err());
    }

    /// Verifies EventBus::emit_lossy() does not panic on a full channel.
    #[test]
    fn test_eventbus_emit_lossy() {
        use std::sync::Arc;
        let bus = Arc::new(EventBus::new(2)); // Small capacity
        let mut _rx = bus.subscribe(); // Subscribe but don't receive

        // Fill the channel well past capacity
        for _ in 0..10 {
            bus.emit_lossy(sample_update());
        }

        assert_eq!(bus.capacity(), 2);
    }

    /// Verifies multiple subscribers receive the same event.
    #[test]
    fn test_eventbus_multiple_subscribers() {
        use std::sync::Arc;
        let bus = Arc::new(EventBus::new(10));
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let mut rx3 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 3);

        bus.emit(sample_update()).expect("emit should succeed");

        let r1 = rx1.try_recv().expect("rx1 should receive");
        let r2 = rx2.try_recv().expect("rx2 should receive");
        let r3 = rx3.try_recv().expect("rx3 should receive");

        assert_eq!(r1.event_type(), "ModelUpdated");
        assert_eq!(r2.event_type(), "ModelUpdated");
        assert_eq!(r3.event_type(), "ModelUpdated");
    }

    /// Verifies SyncEvent::event_type() for every variant.
    #[test]
    fn test_event_type_method() {
        let now = chrono::Utc::now();
        let events = vec![
            (
                SyncEvent::ModelCreated {
                    entity_id: "claude-3-5-sonnet".to_string(),
                    provider_id: "anthropic".to_string(),
                    display_name: "Claude 3.5 Sonnet".to_string(),
                    timestamp: now,
                },
                "ModelCreated",
            ),
            (sample_update(), "ModelUpdated"),
            (
                SyncEvent::SyncCompleted {
                    records_total: 40,
                    records_created: 2,
                    records_updated: 5,
                    data_quality: "complete".to_string(),
                    duration_ms: 1800,
                    timestamp: now,
                },
                "SyncCompleted",
            ),
            (
                SyncEvent::SyncFailed {
                    reason: "upstream timeout".to_string(),
                    consecutive_errors: 2,
                    timestamp: now,
                },
                "SyncFailed",
            ),
            (
                SyncEvent::TaskDisabled {
                    task: "model-sync".to_string(),
                    consecutive_errors: 5,
                    timestamp: now,
                },
                "TaskDisabled",
            ),
            (
                SyncEvent::TaskEnabled {
                    task: "model-sync".to_string(),
                    timestamp: now,
                },
                "TaskEnabled",
            ),
            (
                SyncEvent::CacheInvalidated {
                    pattern: "models:*".to_string(),
                    entries_removed: 12,
                    timestamp: now,
                },
                "CacheInvalidated",
            ),
        ];

        for (event, expected_type) in events {
            assert_eq!(event.event_type(), expected_type);
        }
    }

    /// Verifies the tagged JSON layout used on the wire.
    #[test]
    fn test_event_serialization() {
        let event = SyncEvent::SyncCompleted {
            records_total: 40,
            records_created: 1,
            records_updated: 3,
            data_quality: "complete".to_string(),
            duration_ms: 950,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).expect("Event serialization should succeed");
        assert!(json.contains("\"type\":\"SyncCompleted\""));
        assert!(json.contains("\"records_total\":40"));
        assert!(json.contains("\"data_quality\":\"complete\""));

        let deserialized: SyncEvent =
            serde_json::from_str(&json).expect("Event deserialization should succeed");
        match deserialized {
            SyncEvent::SyncCompleted {
                records_total,
                records_updated,
                ..
            } => {
                assert_eq!(records_total, 40);
                assert_eq!(records_updated, 3);
            }
            _ => panic!("Wrong event type deserialized"),
        }
    }

    /// Verifies entity_id() is populated only for record-scoped events.
    #[test]
    fn test_entity_id_scoping() {
        assert_eq!(sample_update().entity_id(), Some("gpt-4o"));

        let global = SyncEvent::SyncFailed {
            reason: "boom".to_string(),
            consecutive_errors: 1,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(global.entity_id(), None);
    }
}
