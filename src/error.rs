// ============================================================================
// error.rs — TriEvo
// Error taxonomy: initialization, shader compilation, precondition violations.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("failed to decode reference image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode image {path:?}: {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Module or pipeline creation was rejected by validation. Dispatching an
    /// unlinked program is never attempted.
    #[error("shader `{label}` failed to compile: {message}")]
    ShaderCompilation { label: String, message: String },

    #[error("population size must be at least 1")]
    EmptyPopulation,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer size mismatch: expected {expected} entries, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("buffer mapping failed: {0}")]
    BufferMapping(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
