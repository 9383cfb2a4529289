//! Shared test support for the integration suites.
//!
//! Builds a full application context over an in-memory store with an
//! unreachable upstream, plus request/response utilities for driving
//! the router through `tower::ServiceExt::oneshot`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use modelsync_common::config::{default_sanity_rules, UpstreamConfig};
use modelsync_common::events::EventBus;
use modelsync_common::records::{fields, SourceKind, SourceObservation};
use modelsync_common::time;

use modelsync_hub::cache::TieredCache;
use modelsync_hub::config::RuntimeSettings;
use modelsync_hub::db;
use modelsync_hub::realtime::Broadcaster;
use modelsync_hub::reconcile::Reconciler;
use modelsync_hub::scheduler::Scheduler;
use modelsync_hub::sync::SyncContext;
use modelsync_hub::upstream::UpstreamClient;
use modelsync_hub::AppContext;

/// Upstream endpoints on port 9 refuse connections immediately, so any
/// sync attempt fails fast instead of waiting out a timeout.
pub fn unreachable_upstream() -> UpstreamConfig {
    UpstreamConfig {
        api_url: "http://127.0.0.1:9/api/models".to_string(),
        page_url: "http://127.0.0.1:9/models".to_string(),
        api_key: None,
        timeout_secs: 1,
    }
}

/// Full application context over a fresh in-memory database.
pub async fn setup_ctx() -> AppContext {
    setup_ctx_with_upstream(unreachable_upstream()).await
}

pub async fn setup_ctx_with_upstream(upstream_config: UpstreamConfig) -> AppContext {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    db::init_tables(&pool).await.unwrap();

    let settings = RuntimeSettings::load(&pool).await.unwrap();
    let events = EventBus::new(100);
    let cache = Arc::new(TieredCache::new());
    let reconciler = Arc::new(Reconciler::new(default_sanity_rules()));
    let upstream = Arc::new(UpstreamClient::new(&upstream_config).unwrap());
    let broadcaster = Arc::new(Broadcaster::new(
        settings.ws_backfill_size,
        settings.ws_outbound_queue_size,
    ));
    let settings = Arc::new(RwLock::new(settings));

    let sync_ctx = SyncContext {
        pool: pool.clone(),
        cache: cache.clone(),
        events: events.clone(),
        reconciler: reconciler.clone(),
        upstream,
        settings: settings.clone(),
    };
    let scheduler = Scheduler::new(sync_ctx, CancellationToken::new());

    AppContext {
        pool,
        cache,
        events,
        reconciler,
        settings,
        scheduler,
        broadcaster,
        started_at: time::now(),
    }
}

/// Reconcile three scrape-kind records into the store.
///
/// Entity ids: `gpt-4o` (openai), `claude-3-5-sonnet` (anthropic),
/// `gemini-1-5-pro` (google).
pub async fn seed_demo_models(ctx: &AppContext) {
    let demo: [(&str, &str, f64, f64); 3] = [
        ("GPT-4o", "openai", 71.5, 105.0),
        ("Claude 3.5 Sonnet", "anthropic", 75.1, 78.0),
        ("Gemini 1.5 Pro", "google", 68.2, 61.0),
    ];

    for (name, provider, score, speed) in demo {
        let mut claims = BTreeMap::new();
        claims.insert(fields::INTELLIGENCE_SCORE.to_string(), Value::from(score));
        claims.insert(fields::OUTPUT_SPEED.to_string(), Value::from(speed));
        claims.insert(fields::PROVIDER.to_string(), Value::from(provider));

        let obs =
            SourceObservation::new(name, SourceKind::Scrape, claims, time::now()).normalized();
        let entity_id = obs.entity_id.clone().unwrap();
        ctx.reconciler
            .apply(&ctx.pool, &entity_id, std::slice::from_ref(&obs))
            .await
            .unwrap();
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn read_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
