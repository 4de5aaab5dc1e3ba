use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workflow::{RunReport, RunRequest};

/// A submitted run waiting for a free slot.
#[derive(Debug, Clone)]
pub struct RunTask {
    pub run_id: String,
    pub request: RunRequest,
}

impl RunTask {
    pub fn new(request: RunRequest) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            request,
        }
    }

    pub fn description(&self) -> String {
        format!("Run {} against {}", self.run_id, self.request.target_repo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Finished,
    /// Dropped from the queue before it started.
    Cancelled,
}

/// What the service knows about a submitted run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub target_repo: String,
    pub status: RunStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<RunReport>,
}

impl RunRecord {
    pub fn queued(task: &RunTask) -> Self {
        Self {
            run_id: task.run_id.clone(),
            target_repo: task.request.target_repo.clone(),
            status: RunStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            report: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, report: RunReport) {
        self.status = RunStatus::Finished;
        self.finished_at = Some(Utc::now());
        self.report = Some(report);
    }

    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }
}
