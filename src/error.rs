use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sandbox provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Repository clone failed: {0}")]
    CloneFailed(String),

    #[error("Code generation failed: {0}")]
    GenerationFailed(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Unresolved merge conflicts in: {}", .0.join(", "))]
    PublishConflictUnresolved(Vec<String>),

    #[error("Push failed: {0}")]
    PushFailed(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("Claude API rate limited: {0}")]
    ClaudeRateLimited(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
