use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::{watch, RwLock, Semaphore};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::queue::task::{RunRecord, RunStatus, RunTask};
use crate::queue::RunQueue;
use crate::workflow::{Pipeline, RunReport, RunRequest};

pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Pipeline,
    pub queue: RwLock<RunQueue>,
    pub runs: RwLock<HashMap<String, RunRecord>>,
    /// One permit per run allowed to execute at once.
    pub permits: Arc<Semaphore>,
    /// Flipped to `true` on shutdown; every running pipeline watches it.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> crate::error::Result<Self> {
        let pipeline = Pipeline::from_config(&config).await?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: AppConfig, pipeline: Pipeline) -> Self {
        let permits = Arc::new(Semaphore::new(config.server.max_concurrent_runs.max(1)));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            pipeline,
            queue: RwLock::new(RunQueue::new()),
            runs: RwLock::new(HashMap::new()),
            permits,
            shutdown,
        }
    }

    /// Record and enqueue a run. Returns its id.
    pub async fn submit(&self, request: RunRequest) -> String {
        let task = RunTask::new(request);
        let run_id = task.run_id.clone();
        self.runs
            .write()
            .await
            .insert(run_id.clone(), RunRecord::queued(&task));
        self.queue.write().await.enqueue(task);
        run_id
    }

    pub async fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.read().await.get(run_id).cloned()
    }

    pub async fn in_flight_runs(&self) -> Vec<String> {
        self.runs
            .read()
            .await
            .values()
            .filter(|record| record.status == RunStatus::Running)
            .map(|record| record.run_id.clone())
            .collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn mark_running(&self, run_id: &str) {
        if let Some(record) = self.runs.write().await.get_mut(run_id) {
            record.start();
        }
    }

    pub async fn mark_finished(&self, run_id: &str, report: RunReport) {
        if let Some(record) = self.runs.write().await.get_mut(run_id) {
            record.finish(report);
        }
    }

    pub async fn mark_cancelled(&self, run_id: &str) {
        if let Some(record) = self.runs.write().await.get_mut(run_id) {
            record.cancel();
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", post(crate::api::handler::submit_run))
        .route("/runs/:id", get(crate::api::handler::get_run))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
