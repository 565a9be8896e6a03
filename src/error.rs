use thiserror::Error;

/// The four recovery-class error kinds the engine distinguishes.
///
/// Only [`EngineError::Config`] ever propagates out of the orchestrator: it is
/// fatal at process startup. The other three are resolved internally by the
/// orchestrator (publish safe defaults, keep ticking) and are logged via
/// `tracing` rather than returned to a caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("computation error: {0}")]
    Computation(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
