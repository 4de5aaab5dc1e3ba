pub mod handler;
pub mod signature;
