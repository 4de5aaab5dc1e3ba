pub mod task;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::server::AppState;

use task::RunTask;

/// FIFO of submitted runs. Runs start in submission order as slots free up.
pub struct RunQueue {
    pending: VecDeque<RunTask>,
    /// Notification channel for the processor.
    notify: Option<tokio::sync::mpsc::UnboundedSender<()>>,
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            notify: None,
        }
    }

    pub fn set_notifier(&mut self, tx: tokio::sync::mpsc::UnboundedSender<()>) {
        self.notify = Some(tx);
    }

    pub fn enqueue(&mut self, task: RunTask) {
        tracing::info!(run_id = %task.run_id, task = %task.description(), "Enqueuing run");
        self.pending.push_back(task);

        if let Some(ref tx) = self.notify {
            let _ = tx.send(());
        }
    }

    pub fn take_next(&mut self) -> Option<RunTask> {
        self.pending.pop_front()
    }

    /// Remove every pending run, returning their ids.
    pub fn drain(&mut self) -> Vec<String> {
        self.pending.drain(..).map(|task| task.run_id).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Start `task` once a concurrency slot is free. Returns `false` when the
/// service is shutting down and the run was not started.
async fn dispatch(state: &Arc<AppState>, task: RunTask) -> bool {
    let permit = match Arc::clone(&state.permits).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(run_id = %task.run_id, "Run slots closed, dropping run");
            state.mark_cancelled(&task.run_id).await;
            return false;
        }
    };

    if state.is_shutting_down() {
        state.mark_cancelled(&task.run_id).await;
        return false;
    }

    state.mark_running(&task.run_id).await;
    tracing::info!(task = %task.description(), "Processing run");

    let state = Arc::clone(state);
    let cancel = state.shutdown.subscribe();
    tokio::spawn(async move {
        let report = state
            .pipeline
            .run(&task.run_id, task.request.clone(), cancel)
            .await;
        tracing::info!(
            task = %task.description(),
            outcome = ?report.outcome,
            "Run completed"
        );
        state.mark_finished(&task.run_id, report).await;
        drop(permit);
    });
    true
}

/// Run the background queue processor.
pub async fn run_queue_processor(state: Arc<AppState>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    {
        let mut queue = state.queue.write().await;
        queue.set_notifier(tx);
    }

    tracing::info!(
        max_concurrent = state.config.server.max_concurrent_runs,
        "Queue processor started"
    );

    loop {
        // Wait for notification
        if rx.recv().await.is_none() {
            break;
        }

        loop {
            let task = {
                let mut queue = state.queue.write().await;
                queue.take_next()
            };

            let Some(task) = task else {
                break;
            };

            if !dispatch(&state, task).await {
                break;
            }
        }
    }

    tracing::info!("Queue processor stopped");
}
