use ort::Error as OrtError;
use std::time::Duration;

/// Represents the different types of errors that can occur in the image classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The model artifact is missing, malformed, or its declared shapes disagree
    /// with the configured ones. Fatal at startup: the classifier is unavailable.
    #[error("Model load error: {0}")]
    ModelLoadError(String),
    /// The input image cannot be preprocessed (zero size, bad channel count,
    /// inconsistent pixel buffer). The caller should pick another image.
    #[error("Invalid image: {0}")]
    InvalidImageError(String),
    /// Inference failed or produced unusable output. The caller may retry
    /// with a fresh handle.
    #[error("Inference error: {0}")]
    InferenceError(String),
    /// The model handle was already released.
    #[error("Model handle is closed")]
    ClosedHandle,
    /// The score vector handed to the postprocessor was empty.
    #[error("Score vector is empty")]
    EmptyScoreVector,
    /// Labels, shapes and model disagree with each other.
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// The caller stopped waiting for a classification.
    #[error("Classification did not finish within {0:?}")]
    Timeout(Duration),
}

impl ClassifierError {
    /// Whether the error only affects the current call. Fatal errors mean the
    /// classifier (or its configuration) must be rebuilt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidImageError(_) | Self::InferenceError(_) | Self::Timeout(_)
        )
    }
}

impl From<OrtError> for ClassifierError {
    fn from(err: OrtError) -> Self {
        ClassifierError::ModelLoadError(err.to_string())
    }
}
