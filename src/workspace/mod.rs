pub mod conflict;
pub mod git;
pub mod manager;
pub mod publisher;
pub mod repo;

pub use manager::{Workspace, WorkspaceManager};
pub use publisher::{OwnedFiles, PublishOutcome, PublishRequest, Publisher};
