//! End-to-end tests for the synchronization pipeline against a local
//! fixture upstream.
//!
//! A throwaway HTTP server stands in for the upstream catalog so the
//! whole path is exercised for real: fetch, strategy fallback,
//! reconciliation, event emission, run history, and the read API
//! serving the synced data.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower::util::ServiceExt;

use modelsync_common::config::UpstreamConfig;
use modelsync_common::events::SyncEvent;
use modelsync_common::records::{fields, SourceKind, SourceObservation};
use modelsync_common::time;
use modelsync_hub::{build_router, db};

mod helpers;
use helpers::{get as get_req, read_json, setup_ctx_with_upstream};

/// Page fixture whose fragments carry two complete entity objects.
const FRAGMENT_PAGE: &str = r#"<html><body><script>
    self.__next_f.push([1, "{\"model_name\":\"GPT-4o\",\"organization\":\"openai\",\"quality_index\":71.5,\"tokens_per_second\":105.3}"])
    self.__next_f.push([2, "{\"model_name\":\"Claude 3.5 Sonnet\",\"quality_index\":75.1,\"tokens_per_second\":78.0}"])
</script></body></html>"#;

/// Page fixture with no fragment data, only a rendered table.
const TABLE_PAGE: &str = r#"
    <html><body>
    <table class="leaderboard">
      <thead><tr><th>Model</th><th>Quality</th></tr></thead>
      <tbody>
        <tr><td>GPT-4o</td><td>71.5</td></tr>
        <tr><td>Claude 3.5 Sonnet</td><td>75.1</td></tr>
      </tbody>
    </table>
    </body></html>
"#;

fn api_envelope(speed: f64) -> serde_json::Value {
    json!({"models": [
        {"model_name": "GPT-4o", "organization": "openai",
         "quality_index": 71.5, "tokens_per_second": speed},
        {"model_name": "Claude 3.5 Sonnet", "organization": "anthropic",
         "quality_index": 75.1, "tokens_per_second": 78.0},
    ]})
}

/// Serve a fixture router on an ephemeral local port.
async fn spawn_fixture(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn upstream_at(base: &str) -> UpstreamConfig {
    UpstreamConfig {
        api_url: format!("{}/api/models", base),
        page_url: format!("{}/models", base),
        api_key: None,
        timeout_secs: 2,
    }
}

#[tokio::test]
async fn test_sync_ingests_api_envelope() {
    let base = spawn_fixture(
        Router::new().route("/api/models", get(|| async { Json(api_envelope(105.3)) })),
    )
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    let mut rx = ctx.events.subscribe();
    ctx.scheduler.run_now("model-sync").await.unwrap();

    assert_eq!(db::records::count_records(&ctx.pool).await.unwrap(), 2);
    let gpt = db::records::get_record(&ctx.pool, "gpt-4o")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gpt.provider_id, "openai");
    assert_eq!(gpt.numeric_field(fields::OUTPUT_SPEED), Some(105.3));
    assert_eq!(
        gpt.field(fields::OUTPUT_SPEED).unwrap().source_kind,
        SourceKind::Api
    );

    let runs = db::sync_runs::recent_runs(&ctx.pool, 5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].success);
    assert_eq!(runs[0].strategy.as_deref(), Some("api_envelope"));
    assert_eq!(runs[0].data_quality, "complete");
    assert_eq!(runs[0].records_total, 2);
    assert_eq!(runs[0].records_created, 2);
    assert_eq!(runs[0].records_updated, 0);

    let events: Vec<SyncEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let created = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::ModelCreated { .. }))
        .count();
    let completed = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::SyncCompleted { .. }))
        .count();
    assert_eq!(created, 2);
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_second_sync_picks_up_changed_values() {
    let hits = Arc::new(AtomicUsize::new(0));
    let route_hits = hits.clone();
    let base = spawn_fixture(Router::new().route(
        "/api/models",
        get(move || {
            let hits = route_hits.clone();
            async move {
                let speed = if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    105.3
                } else {
                    130.0
                };
                Json(api_envelope(speed))
            }
        }),
    ))
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    ctx.scheduler.run_now("model-sync").await.unwrap();

    let mut rx = ctx.events.subscribe();
    ctx.scheduler.run_now("model-sync").await.unwrap();

    let gpt = db::records::get_record(&ctx.pool, "gpt-4o")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gpt.numeric_field(fields::OUTPUT_SPEED), Some(130.0));

    let runs = db::sync_runs::recent_runs(&ctx.pool, 5).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].records_created, 0);
    assert_eq!(runs[0].records_updated, 1);

    let events: Vec<SyncEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let updated = events.iter().find_map(|e| match e {
        SyncEvent::ModelUpdated {
            entity_id,
            changed_fields,
            ..
        } => Some((entity_id.clone(), changed_fields.clone())),
        _ => None,
    });
    let (entity_id, changed_fields) = updated.expect("expected a ModelUpdated event");
    assert_eq!(entity_id, "gpt-4o");
    assert_eq!(changed_fields, vec![fields::OUTPUT_SPEED.to_string()]);
}

#[tokio::test]
async fn test_api_failure_falls_back_to_page_scrape() {
    let base = spawn_fixture(
        Router::new()
            .route(
                "/api/models",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route("/models", get(|| async { Html(FRAGMENT_PAGE) })),
    )
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    ctx.scheduler.run_now("model-sync").await.unwrap();

    assert_eq!(db::records::count_records(&ctx.pool).await.unwrap(), 2);
    let gpt = db::records::get_record(&ctx.pool, "gpt-4o")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        gpt.field(fields::OUTPUT_SPEED).unwrap().source_kind,
        SourceKind::Scrape
    );

    let runs = db::sync_runs::recent_runs(&ctx.pool, 5).await.unwrap();
    assert!(runs[0].success);
    assert_eq!(runs[0].strategy.as_deref(), Some("entity_objects"));
    // The failed API attempt is carried in the run's error list
    assert_eq!(runs[0].data_quality, "partial");
    assert!(runs[0].errors.iter().any(|e| e.starts_with("api:")));
}

#[tokio::test]
async fn test_empty_envelope_falls_through_to_page() {
    let base = spawn_fixture(
        Router::new()
            .route(
                "/api/models",
                get(|| async { Json(json!({"models": []})) }),
            )
            .route("/models", get(|| async { Html(FRAGMENT_PAGE) })),
    )
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    ctx.scheduler.run_now("model-sync").await.unwrap();

    let runs = db::sync_runs::recent_runs(&ctx.pool, 5).await.unwrap();
    assert!(runs[0].success);
    assert_eq!(runs[0].strategy.as_deref(), Some("entity_objects"));
    assert_eq!(db::records::count_records(&ctx.pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_table_fallback_is_flagged_as_degraded() {
    let base = spawn_fixture(
        Router::new()
            .route(
                "/api/models",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route("/models", get(|| async { Html(TABLE_PAGE) })),
    )
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    ctx.scheduler.run_now("model-sync").await.unwrap();

    let runs = db::sync_runs::recent_runs(&ctx.pool, 5).await.unwrap();
    assert!(runs[0].success);
    assert_eq!(runs[0].strategy.as_deref(), Some("table_fallback"));
    assert_eq!(runs[0].data_quality, "fallback");
    assert_eq!(runs[0].records_total, 2);
}

#[tokio::test]
async fn test_manual_override_survives_full_sync() {
    let base = spawn_fixture(
        Router::new().route("/api/models", get(|| async { Json(api_envelope(105.3)) })),
    )
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    ctx.scheduler.run_now("model-sync").await.unwrap();

    // Operator pins the speed
    let mut claims = std::collections::BTreeMap::new();
    claims.insert(fields::OUTPUT_SPEED.to_string(), json!(240.0));
    let obs = SourceObservation::new("GPT-4o", SourceKind::Manual, claims, time::now());
    ctx.reconciler
        .apply(&ctx.pool, "gpt-4o", std::slice::from_ref(&obs))
        .await
        .unwrap();

    // The next sync reports 105.3 again; the manual value holds
    ctx.scheduler.run_now("model-sync").await.unwrap();

    let gpt = db::records::get_record(&ctx.pool, "gpt-4o")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gpt.numeric_field(fields::OUTPUT_SPEED), Some(240.0));
    assert_eq!(
        gpt.field(fields::OUTPUT_SPEED).unwrap().source_kind,
        SourceKind::Manual
    );
}

#[tokio::test]
async fn test_synced_data_is_served_by_the_read_api() {
    let base = spawn_fixture(
        Router::new().route("/api/models", get(|| async { Json(api_envelope(105.3)) })),
    )
    .await;
    let ctx = setup_ctx_with_upstream(upstream_at(&base)).await;

    ctx.scheduler.run_now("model-sync").await.unwrap();

    let app = build_router(ctx);
    let body = read_json(
        app.oneshot(get_req("/models"))
            .await
            .unwrap()
            .into_body(),
    )
    .await;
    assert_eq!(body["dataSource"], "live");
    assert_eq!(body["count"], 2);
    let ids: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["entity_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"gpt-4o"));
    assert!(ids.contains(&"claude-3-5-sonnet"));
}
