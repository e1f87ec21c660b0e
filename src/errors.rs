//! Error kinds reported by OCR engines.
//!
//! Everything travels as [`anyhow::Error`], but engines wrap their root causes
//! in an [`OcrError`] so callers (and tests) can tell the failure classes
//! apart with [`anyhow::Error::downcast_ref`].

use crate::prelude::*;

/// The ways an OCR run can fail.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The input image is missing, unreadable, or not a decodable image.
    #[error("cannot read image {path:?}: {reason}")]
    InvalidInputPath { path: PathBuf, reason: String },

    /// The engine could not be started, usually because model weights are
    /// unavailable or the runtime is missing.
    #[error("OCR engine failed to initialize: {0}")]
    EngineInitialization(String),

    /// The engine failed while recognizing text.
    #[error("OCR engine failed: {0}")]
    EngineRuntime(String),
}

impl OcrError {
    /// Build an [`OcrError::InvalidInputPath`] from any displayable cause.
    pub fn invalid_input(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::InvalidInputPath {
            path: path.to_owned(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_mentions_path() {
        let err = OcrError::invalid_input(Path::new("missing.png"), "not found");
        let msg = err.to_string();
        assert!(msg.contains("missing.png"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn downcasts_through_anyhow() {
        let err: anyhow::Error = OcrError::EngineRuntime("boom".to_owned()).into();
        let err = err.context("while recognizing");
        assert!(matches!(
            err.downcast_ref::<OcrError>(),
            Some(OcrError::EngineRuntime(_))
        ));
    }
}
