//! HTTP API: read endpoints, admin operations, and realtime feeds

pub mod health;
pub mod models;
pub mod server;
pub mod settings;
pub mod sse;
pub mod tasks;
pub mod ws;

pub use server::{build_router, run, AppContext};
