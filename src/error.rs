use thiserror::Error;

/// Failures raised by the benchmark core.
///
/// `Validation` and `ThresholdConfig` abort the operation before anything is
/// changed. `UnresolvedReference` is reported per entry and only becomes fatal
/// when a caller asks for a fully resolved manifest.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchmarkError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("entry {entry_id} references an image that could not be resolved: {image_ref}")]
    UnresolvedReference { entry_id: String, image_ref: String },

    #[error("invalid threshold configuration: {0}")]
    ThresholdConfig(String),
}

pub type CoreResult<T> = std::result::Result<T, BenchmarkError>;

impl BenchmarkError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
