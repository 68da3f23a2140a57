//! Error types for the MU density engine.
//!
//! None of these ever reach the display layer: a failure only means a field
//! is temporarily or permanently absent from the registry.

use thiserror::Error;

/// Errors raised by coordinate conversions.
#[derive(Debug, Clone, Error)]
pub enum GeometryError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

/// Why a comm log record produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordSkip {
    /// Destruction or "Your Link" notices.
    #[error("noise record")]
    Noise,

    /// No portal markup at all.
    #[error("record names no portal")]
    MissingOrigin,

    /// One portal, but neither a link target nor a field quantity.
    #[error("record is neither a link nor a field")]
    NeitherLinkNorField,

    /// Record guid already ingested.
    #[error("record already ingested")]
    Duplicate,
}
