//! # ModelSync Hub (modelsync-hub)
//!
//! Synchronization and real-time distribution service for AI model records.
//!
//! **Purpose:** Pull model data from an upstream catalog on a schedule,
//! reconcile it into a canonical store with source-precedence and anomaly
//! rejection, and serve it through a read API that degrades instead of
//! failing, plus SSE and WebSocket feeds for live updates.
//!
//! **Architecture:** Single service over SQLite. The scheduler drives the
//! sync pipeline (fetch, extract, reconcile, persist), the tiered cache
//! absorbs read traffic, and the broadcaster fans reconciliation events out
//! to room-scoped WebSocket subscribers.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod realtime;
pub mod reconcile;
pub mod scheduler;
pub mod sync;
pub mod upstream;

pub use api::{build_router, AppContext};
pub use error::{ApiError, ApiResult};
