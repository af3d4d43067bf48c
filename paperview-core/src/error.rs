use std::path::PathBuf;

use thiserror::Error;

/// Why an open attempt failed. Terminal for that attempt; never retried
/// automatically and never allowed to disturb a document that is already
/// open.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OpenError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("the file is not a valid PDF document")]
    InvalidFormat,
    #[error("unable to open PDF: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Unknown(String),
}

/// Page-level failures stay local to the page slot; they never escalate to
/// a session-level error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("render cancelled")]
    Cancelled,
    #[error("document session has been released")]
    SessionClosed,
    #[error("render backend error: {0}")]
    Backend(String),
}

const PDF_MAGIC: &[u8] = b"%PDF";

/// Cheap structural check before handing bytes to the decode backend.
/// Rejects empty payloads and anything without the `%PDF` magic header.
pub fn check_signature(bytes: &[u8]) -> Result<(), OpenError> {
    if bytes.is_empty() {
        return Err(OpenError::InvalidFormat);
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(OpenError::InvalidFormat);
    }
    Ok(())
}
