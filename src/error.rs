use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LprError>;

#[derive(Debug, Error)]
pub enum LprError {
    /// Image has no pixels or could not be used as pipeline input
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    #[error("failed to load classifier model {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("OCR engine error: {0}")]
    Ocr(String),

    #[error("configuration error: {0}")]
    Config(String),
}
