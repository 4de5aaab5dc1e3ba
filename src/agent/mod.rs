pub mod claude;
pub mod codegen;
pub mod prompt;

pub use codegen::{ClaudeCodeGenerator, CodeGenerator, CommitContext};
