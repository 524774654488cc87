//! Typed error kinds for the engine's core pipeline.
//!
//! One variant per distinct failure kind the engine recognizes: each recovery strategy lives
//! next to the call site that triggers it, not here — this enum only
//! carries enough context to log and to decide which fallback applies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("model call timed out after {0:?}")]
    ModelTimeout(std::time::Duration),

    #[error("tool invocation failed: {0}")]
    ToolInvocationFailed(String),

    #[error("geographic restriction from model provider: {0}")]
    GeoRestricted(String),

    #[error("generation failed after retries: {0}")]
    GenerationFailed(String),

    #[error("leak detected in model output")]
    LeakDetected,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("role not configured: {0}")]
    RoleNotConfigured(String),

    #[error("persona missing for role {0}")]
    PersonaMissing(String),
}

impl EngineError {
    /// True when this error indicates the model provider rejected the
    /// request for geographic reasons; callers fall back to a plain,
    /// non-tool-augmented call.
    pub fn is_geo_restricted(&self) -> bool {
        matches!(self, EngineError::GeoRestricted(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
