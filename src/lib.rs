pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod queue;
pub mod sandbox;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod validate;
pub mod workflow;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;
