//! Error types for the governance control plane

use thiserror::Error;

/// Result type alias for governance operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

#[derive(Error, Debug)]
pub enum GovernanceError {

    // =============================
    // Decision Errors
    // =============================

    /// The decision authority could not produce a verdict.
    /// Never interpreted as DENY or ALLOW by the gate itself.
    #[error("Policy gate unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Workflow blocked: {0}")]
    WorkflowBlocked(String),

    // =============================
    // Execution Path Errors
    // =============================

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Preparation failed: {0}")]
    PreparationFailed(String),

    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
