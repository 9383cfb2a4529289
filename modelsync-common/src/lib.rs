//! # ModelSync Common Library
//!
//! Shared code for the ModelSync pipeline including:
//! - Error taxonomy (Error enum + Result alias)
//! - Record and observation types with per-field provenance
//! - Event types (SyncEvent enum) and the EventBus
//! - Entity id normalization and provider inference
//! - Bootstrap configuration loading
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod records;
pub mod slug;
pub mod time;

pub use error::{Error, Result};
pub use records::{CanonicalRecord, DataSource, FieldValue, SourceKind, SourceObservation};
