use thiserror::Error;

/// Failure of a single inference call.
///
/// Every stage of the pipeline returns one of these; nothing is retried and
/// nothing is partially returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("embedding extraction failed: {0}")]
    Extraction(String),

    #[error("embedding has {actual} dimensions, classifier expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("class index {index} is outside the label map (0..{len})")]
    UnknownLabel { index: usize, len: usize },

    #[error("model runtime error: {0}")]
    Backend(String),
}

impl InferenceError {
    /// True when the caller sent bad input, false for internal faults.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }
}

#[derive(Debug, Error)]
pub enum LabelMapError {
    #[error("label map JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("label key {0:?} is not a class index")]
    BadKey(String),

    #[error("class index {0} appears more than once")]
    Duplicate(usize),

    #[error("label indices must cover 0..{len}, index {missing} is missing")]
    Gap { missing: usize, len: usize },

    #[error("label map is empty")]
    Empty,
}
