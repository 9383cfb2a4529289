//! Periodic task scheduling with per-task overlap guards and a circuit
//! breaker.
//!
//! Three tasks run on independent loops: the model sync, the status
//! summary refresh, and the cache sweep. Each task skips a tick while a
//! previous run is still in flight, counts consecutive failures, backs
//! off exponentially while failing, and is disabled once the failure
//! threshold is crossed. A disabled task stops scheduling future runs
//! until an operator re-arms it; a manual trigger still works while
//! disabled. All retry policy lives here; the fetch code makes exactly
//! one attempt per run.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modelsync_common::events::SyncEvent;
use modelsync_common::{time, Error, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeSettings;
use crate::sync::{self, SyncContext};

/// The fixed set of scheduled tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ModelSync,
    HealthCheck,
    CacheCleanup,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::ModelSync => "model-sync",
            TaskKind::HealthCheck => "health-check",
            TaskKind::CacheCleanup => "cache-cleanup",
        }
    }

    pub fn parse(name: &str) -> Option<TaskKind> {
        match name {
            "model-sync" => Some(TaskKind::ModelSync),
            "health-check" => Some(TaskKind::HealthCheck),
            "cache-cleanup" => Some(TaskKind::CacheCleanup),
            _ => None,
        }
    }

    fn interval(&self, settings: &RuntimeSettings) -> std::time::Duration {
        match self {
            TaskKind::ModelSync => settings.sync_interval(),
            TaskKind::HealthCheck => settings.health_check_interval(),
            TaskKind::CacheCleanup => settings.cache_cleanup_interval(),
        }
    }
}

/// Snapshot of one task for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub name: String,
    pub schedule: String,
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub disabled: bool,
}

struct TaskState {
    kind: TaskKind,
    is_running: AtomicBool,
    disabled: AtomicBool,
    consecutive_errors: AtomicU32,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl TaskState {
    fn new(kind: TaskKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            is_running: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            consecutive_errors: AtomicU32::new(0),
            last_run: Mutex::new(None),
        })
    }
}

pub struct Scheduler {
    ctx: SyncContext,
    tasks: Vec<Arc<TaskState>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(ctx: SyncContext, shutdown: CancellationToken) -> Arc<Self> {
        let tasks = [
            TaskKind::ModelSync,
            TaskKind::HealthCheck,
            TaskKind::CacheCleanup,
        ]
        .into_iter()
        .map(TaskState::new)
        .collect();

        Arc::new(Self {
            ctx,
            tasks,
            shutdown,
        })
    }

    /// Spawn one loop per task. Loops stop when the shutdown token fires.
    pub fn start(self: &Arc<Self>) {
        for task in &self.tasks {
            let scheduler = Arc::clone(self);
            let task = Arc::clone(task);
            tokio::spawn(async move {
                scheduler.run_loop(task).await;
            });
        }
        info!("Scheduler started with {} tasks", self.tasks.len());
    }

    async fn run_loop(self: Arc<Self>, task: Arc<TaskState>) {
        loop {
            let interval = {
                let settings = self.ctx.settings.read().await;
                backoff_interval(
                    task.kind.interval(&settings),
                    task.consecutive_errors.load(Ordering::Relaxed),
                )
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Task '{}' loop stopped", task.kind.name());
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            // Disabled tasks stop scheduling; an in-flight run is unaffected
            if task.disabled.load(Ordering::Relaxed) {
                continue;
            }
            self.execute(&task).await;
        }
    }

    /// Run the task body once, honoring the overlap guard and the breaker.
    async fn execute(&self, task: &TaskState) {
        let name = task.kind.name();
        if task
            .is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Task '{}' is already running, skipping this trigger", name);
            return;
        }

        let started = time::now();
        let result = run_task_body(task.kind, &self.ctx).await;
        *task.last_run.lock().await = Some(started);

        match result {
            Ok(()) => {
                task.consecutive_errors.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                let errors = task.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                error!("Task '{}' failed ({} consecutive): {}", name, errors, e);

                if task.kind == TaskKind::ModelSync {
                    self.ctx.events.emit_lossy(SyncEvent::SyncFailed {
                        reason: e.to_string(),
                        consecutive_errors: errors,
                        timestamp: time::now(),
                    });
                }

                let threshold = self.ctx.settings.read().await.max_consecutive_errors;
                if errors >= threshold && !task.disabled.swap(true, Ordering::Relaxed) {
                    error!(
                        "Task '{}' disabled after {} consecutive errors; re-arm it via the API",
                        name, errors
                    );
                    self.ctx.events.emit_lossy(SyncEvent::TaskDisabled {
                        task: name.to_string(),
                        consecutive_errors: errors,
                        timestamp: time::now(),
                    });
                }
            }
        }

        task.is_running.store(false, Ordering::Release);
    }

    /// Trigger one run immediately, bypassing the schedule.
    ///
    /// Works on disabled tasks too; only the scheduled loop honors the
    /// disabled flag. An overlapping run is still a logged no-op.
    pub async fn run_now(&self, name: &str) -> Result<()> {
        let task = self.find(name)?;
        info!("Manual run requested for task '{}'", name);
        self.execute(&task).await;
        Ok(())
    }

    /// Re-arm a task: clear the disabled flag and the error count.
    pub async fn enable(&self, name: &str) -> Result<()> {
        let task = self.find(name)?;
        task.consecutive_errors.store(0, Ordering::Relaxed);
        if task.disabled.swap(false, Ordering::Relaxed) {
            info!("Task '{}' re-enabled", name);
            self.ctx.events.emit_lossy(SyncEvent::TaskEnabled {
                task: name.to_string(),
                timestamp: time::now(),
            });
        }
        Ok(())
    }

    /// Status snapshots for all tasks, in registration order.
    pub async fn status(&self) -> Vec<TaskStatus> {
        let settings = self.ctx.settings.read().await;
        let mut statuses = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            statuses.push(TaskStatus {
                name: task.kind.name().to_string(),
                schedule: format!("every {}s", task.kind.interval(&settings).as_secs()),
                is_running: task.is_running.load(Ordering::Relaxed),
                last_run: *task.last_run.lock().await,
                consecutive_errors: task.consecutive_errors.load(Ordering::Relaxed),
                disabled: task.disabled.load(Ordering::Relaxed),
            });
        }
        statuses
    }

    fn find(&self, name: &str) -> Result<Arc<TaskState>> {
        self.tasks
            .iter()
            .find(|t| t.kind.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Unknown task '{}'", name)))
    }
}

/// Next sleep for a task given its failure streak.
///
/// Doubles per consecutive error, capped at eight times the base.
fn backoff_interval(base: std::time::Duration, consecutive_errors: u32) -> std::time::Duration {
    base * 2u32.pow(consecutive_errors.min(3))
}

async fn run_task_body(kind: TaskKind, ctx: &SyncContext) -> Result<()> {
    match kind {
        TaskKind::ModelSync => {
            sync::run_model_sync(ctx).await?;
            Ok(())
        }
        TaskKind::HealthCheck => {
            let summary = sync::build_status_summary(&ctx.pool).await?;
            let (ttl, stale_after) = {
                let settings = ctx.settings.read().await;
                (settings.cache_ttl(), settings.cache_stale_after())
            };
            ctx.cache.set("status:summary", summary, ttl, stale_after);
            Ok(())
        }
        TaskKind::CacheCleanup => {
            ctx.cache.cleanup_expired();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::db;
    use crate::reconcile::Reconciler;
    use crate::upstream::UpstreamClient;
    use modelsync_common::config::{default_sanity_rules, UpstreamConfig};
    use modelsync_common::events::EventBus;
    use tokio::sync::RwLock;

    async fn test_scheduler() -> Arc<Scheduler> {
        let pool = db::setup_test_db().await;
        let settings = RuntimeSettings::load(&pool).await.unwrap();
        // Port 9 refuses connections, so model-sync fails fast
        let upstream = UpstreamClient::new(&UpstreamConfig {
            api_url: "http://127.0.0.1:9/api/models".to_string(),
            page_url: "http://127.0.0.1:9/models".to_string(),
            api_key: None,
            timeout_secs: 1,
        })
        .unwrap();

        let ctx = SyncContext {
            pool,
            cache: Arc::new(TieredCache::new()),
            events: EventBus::new(100),
            reconciler: Arc::new(Reconciler::new(default_sanity_rules())),
            upstream: Arc::new(upstream),
            settings: Arc::new(RwLock::new(settings)),
        };
        Scheduler::new(ctx, CancellationToken::new())
    }

    fn state<'a>(scheduler: &'a Scheduler, kind: TaskKind) -> &'a Arc<TaskState> {
        scheduler.tasks.iter().find(|t| t.kind == kind).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = std::time::Duration::from_secs(300);
        assert_eq!(backoff_interval(base, 0), base);
        assert_eq!(backoff_interval(base, 1), base * 2);
        assert_eq!(backoff_interval(base, 2), base * 4);
        assert_eq!(backoff_interval(base, 3), base * 8);
        // Streaks past the cap stop growing
        assert_eq!(backoff_interval(base, 10), base * 8);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let scheduler = test_scheduler().await;
        assert!(matches!(
            scheduler.run_now("nope").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            scheduler.enable("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_succeeds_and_warms_cache() {
        let scheduler = test_scheduler().await;
        scheduler.run_now("health-check").await.unwrap();

        let task = state(&scheduler, TaskKind::HealthCheck);
        assert_eq!(task.consecutive_errors.load(Ordering::Relaxed), 0);
        assert!(task.last_run.lock().await.is_some());
        assert!(scheduler.ctx.cache.get("status:summary").is_some());
    }

    #[tokio::test]
    async fn test_failed_run_increments_error_count() {
        let scheduler = test_scheduler().await;
        let mut rx = scheduler.ctx.events.subscribe();

        scheduler.run_now("model-sync").await.unwrap();

        let task = state(&scheduler, TaskKind::ModelSync);
        assert_eq!(task.consecutive_errors.load(Ordering::Relaxed), 1);
        assert!(!task.disabled.load(Ordering::Relaxed));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type(), "SyncFailed");
    }

    #[tokio::test]
    async fn test_breaker_disables_after_threshold() {
        let scheduler = test_scheduler().await;
        scheduler
            .ctx
            .settings
            .write()
            .await
            .max_consecutive_errors = 2;
        let mut rx = scheduler.ctx.events.subscribe();

        scheduler.run_now("model-sync").await.unwrap();
        scheduler.run_now("model-sync").await.unwrap();

        let task = state(&scheduler, TaskKind::ModelSync);
        assert!(task.disabled.load(Ordering::Relaxed));
        assert_eq!(task.consecutive_errors.load(Ordering::Relaxed), 2);

        let types: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(types, vec!["SyncFailed", "SyncFailed", "TaskDisabled"]);
    }

    #[tokio::test]
    async fn test_success_resets_error_count() {
        let scheduler = test_scheduler().await;
        let task = state(&scheduler, TaskKind::HealthCheck);
        task.consecutive_errors.store(3, Ordering::Relaxed);

        scheduler.run_now("health-check").await.unwrap();
        assert_eq!(task.consecutive_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_enable_rearms_disabled_task() {
        let scheduler = test_scheduler().await;
        let task = state(&scheduler, TaskKind::ModelSync).clone();
        task.disabled.store(true, Ordering::Relaxed);
        task.consecutive_errors.store(5, Ordering::Relaxed);
        let mut rx = scheduler.ctx.events.subscribe();

        scheduler.enable("model-sync").await.unwrap();
        assert!(!task.disabled.load(Ordering::Relaxed));
        assert_eq!(task.consecutive_errors.load(Ordering::Relaxed), 0);
        assert_eq!(rx.try_recv().unwrap().event_type(), "TaskEnabled");

        // Enabling an armed task is idempotent and emits nothing
        scheduler.enable("model-sync").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_run_bypasses_disabled_flag() {
        let scheduler = test_scheduler().await;
        let task = state(&scheduler, TaskKind::HealthCheck).clone();
        task.disabled.store(true, Ordering::Relaxed);

        scheduler.run_now("health-check").await.unwrap();
        assert!(task.last_run.lock().await.is_some());
        // Still disabled afterwards; only enable() re-arms
        assert!(task.disabled.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_a_noop() {
        let scheduler = test_scheduler().await;
        let task = state(&scheduler, TaskKind::ModelSync);

        // First trigger yields at its network await, second sees it running
        tokio::join!(
            scheduler.execute(task),
            scheduler.execute(task),
        );

        assert_eq!(task.consecutive_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_status_snapshot_shape() {
        let scheduler = test_scheduler().await;
        let statuses = scheduler.status().await;
        assert_eq!(statuses.len(), 3);

        let sync_status = statuses.iter().find(|s| s.name == "model-sync").unwrap();
        assert_eq!(sync_status.schedule, "every 300s");
        assert!(!sync_status.is_running);
        assert!(sync_status.last_run.is_none());

        let json = serde_json::to_value(sync_status).unwrap();
        assert!(json.get("isRunning").is_some());
        assert!(json.get("consecutiveErrors").is_some());
        assert!(json.get("lastRun").is_some());
    }

    #[tokio::test]
    async fn test_scheduled_loop_runs_and_stops() {
        let scheduler = test_scheduler().await;
        scheduler
            .ctx
            .settings
            .write()
            .await
            .health_check_interval_seconds = 1;
        scheduler.start();

        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        let task = state(&scheduler, TaskKind::HealthCheck);
        assert!(task.last_run.lock().await.is_some());

        scheduler.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_disabled_task_skips_scheduled_ticks() {
        let scheduler = test_scheduler().await;
        scheduler
            .ctx
            .settings
            .write()
            .await
            .health_check_interval_seconds = 1;
        let task = state(&scheduler, TaskKind::HealthCheck).clone();
        task.disabled.store(true, Ordering::Relaxed);
        scheduler.start();

        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        assert!(task.last_run.lock().await.is_none());

        scheduler.shutdown.cancel();
    }
}
