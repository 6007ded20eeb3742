use thiserror::Error;

// ============================================================================
// Resource errors (broken build/deployment, never defaulted)
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("malformed anchor on line {line}: {reason}")]
    MalformedAnchor { line: usize, reason: String },

    #[error("anchor table is empty")]
    NoAnchors,

    #[error("label map has {ids} ids but {names} names")]
    LabelCountMismatch { ids: usize, names: usize },

    #[error("label map defines no classes")]
    NoLabels,

    #[error("mega-category mapping is invalid: {0}")]
    MegaCategoryMapping(String),

    #[error("failed to read resource {path}: {reason}")]
    Read { path: String, reason: String },
}

// ============================================================================
// Inference engine errors (degrade to "no detections" per chip)
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("inference engine unavailable: {0}")]
    Unavailable(String),

    #[error("inference failed: {0}")]
    Failed(String),
}

// ============================================================================
// Pipeline errors (API boundary)
// ============================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("unexpected {tensor} tensor shape: expected {expected:?}, got {got:?}")]
    ModelShape {
        tensor: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("image too large: {chips} chips, max {max}")]
    ImageTooLarge { chips: usize, max: usize },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("chip worker failed: {0}")]
    Worker(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Inference,
    Storage,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Inference => "INFERENCE_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::ImageTooLarge { .. } => ErrorKind::Validation,
            Self::Resource(_) | Self::ModelShape { .. } => ErrorKind::Configuration,
            Self::Engine(_) => ErrorKind::Inference,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Worker(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        tracing::error!(error = %e, "sqlite error");
        PipelineError::Storage(e.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
