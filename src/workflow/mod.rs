pub mod fsm;
pub mod local;
pub mod pipeline;
pub mod revision;
pub mod types;

pub use pipeline::Pipeline;
pub use types::{RunOutcome, RunReport, RunRequest};
