//! The bounded revise-and-revalidate loop.

use serde::Serialize;

use crate::agent::CodeGenerator;
use crate::state::{ErrorKind, FailureRecord, WorkflowState};
use crate::workflow::fsm::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Proceed,
    Revise,
    GiveUp,
}

/// Verdict on the latest validation. A phase 2 setup failure leaves
/// `execution.successful` set and so yields [`Decision::Proceed`]; keeping
/// it off the publish path is the router's job.
pub fn decide(state: &WorkflowState) -> Decision {
    if state.execution.successful {
        Decision::Proceed
    } else if state.can_revise() {
        Decision::Revise
    } else {
        Decision::GiveUp
    }
}

/// Ask for a replacement artifact from the previous one and the latest
/// failure only. The attempt counts whether or not the call succeeds.
pub async fn revise(state: WorkflowState, generator: &dyn CodeGenerator) -> (WorkflowState, Event) {
    let artifact = state.artifact.clone().unwrap_or_default();
    let failure = state.execution.failure.clone().unwrap_or_else(|| FailureRecord {
        kind: ErrorKind::Execution,
        name: "UnknownError".to_string(),
        detail: "validation failed without a recorded error".to_string(),
    });

    let state = state.with_revision_attempt();
    let attempt = state.revision_attempts();
    tracing::info!(
        attempt,
        max = state.max_revision_attempts,
        kind = %failure.kind,
        error = %failure.name,
        "Revising artifact"
    );

    match generator.revise(&artifact, &failure).await {
        Ok(revised) => (
            state
                .with_artifact(revised)
                .with_status(format!("Revision {attempt} generated")),
            Event::Revised,
        ),
        Err(e) => {
            tracing::warn!(attempt, error = %e, "Revision failed");
            (
                state.with_error(format!("[revision] attempt {attempt}: {e}")),
                Event::RevisionFailed,
            )
        }
    }
}
