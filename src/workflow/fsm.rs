//! The run's stage machine. [`transition`] is pure, so every branch of the
//! routing can be tested without a sandbox.

use std::fmt;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::workflow::revision::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provisioning,
    Cloning,
    Generating,
    ValidatingPhase1,
    ValidatingPhase2,
    Revising,
    Publishing,
    LocalOnly,
    TearingDown,
    Done,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Provisioning => "provisioning",
            Stage::Cloning => "cloning",
            Stage::Generating => "generating",
            Stage::ValidatingPhase1 => "validating_phase1",
            Stage::ValidatingPhase2 => "validating_phase2",
            Stage::Revising => "revising",
            Stage::Publishing => "publishing",
            Stage::LocalOnly => "local_only",
            Stage::TearingDown => "tearing_down",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of the step that ran in the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Provisioned,
    ProvisionFailed,
    Cloned,
    CloneFailed,
    Generated,
    GenerationFailed,
    Phase1Passed,
    /// The revision controller's verdict after a validation attempt.
    Decided(Decision),
    /// Phase 2 could not be set up; the artifact itself passed.
    Phase2Degraded,
    Revised,
    RevisionFailed,
    Published,
    PublishFailed,
    Saved,
    TornDown,
    Cancelled,
}

pub fn transition(stage: Stage, event: &Event) -> Result<Stage> {
    use Event as E;
    use Stage as S;

    let next = match (stage, event) {
        (S::TearingDown, E::TornDown) => S::Done,
        (S::TearingDown | S::Done, _) => return Err(invalid(stage, event)),
        (_, E::Cancelled) => S::TearingDown,

        (S::Provisioning, E::Provisioned) => S::Cloning,
        (S::Provisioning, E::ProvisionFailed) => S::TearingDown,

        (S::Cloning, E::Cloned) => S::Generating,
        (S::Cloning, E::CloneFailed) => S::TearingDown,

        (S::Generating, E::Generated) => S::ValidatingPhase1,
        (S::Generating, E::GenerationFailed) => S::TearingDown,

        (S::ValidatingPhase1, E::Phase1Passed) => S::ValidatingPhase2,
        (S::ValidatingPhase1, E::Decided(Decision::Revise)) => S::Revising,
        (S::ValidatingPhase1, E::Decided(Decision::GiveUp)) => S::LocalOnly,

        (S::ValidatingPhase2, E::Decided(Decision::Proceed)) => S::Publishing,
        (S::ValidatingPhase2, E::Decided(Decision::Revise)) => S::Revising,
        (S::ValidatingPhase2, E::Decided(Decision::GiveUp)) => S::LocalOnly,
        (S::ValidatingPhase2, E::Phase2Degraded) => S::LocalOnly,

        (S::Revising, E::Revised | E::RevisionFailed) => S::ValidatingPhase1,

        (S::Publishing, E::Published) => S::TearingDown,
        (S::Publishing, E::PublishFailed) => S::LocalOnly,

        (S::LocalOnly, E::Saved) => S::TearingDown,

        _ => return Err(invalid(stage, event)),
    };
    Ok(next)
}

fn invalid(stage: Stage, event: &Event) -> AppError {
    AppError::InvalidTransition(format!("{event:?} in stage {stage}"))
}
