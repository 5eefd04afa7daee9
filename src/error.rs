use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RectoError>;

#[derive(Debug, Error)]
pub enum RectoError {
    #[error("invalid manifest: {field}: {message}")]
    Validation { field: String, message: String },
    #[error("cannot read pdf {}: {}", .path.display(), .message)]
    Read { path: PathBuf, message: String },
    #[error("render error: {0}")]
    Render(String),
    #[error("overlay failed on page {page}: {message}")]
    RenderPage { page: usize, message: String },
    #[error("cache error: {0}")]
    Cache(String),
    #[error("font error: {0}")]
    Font(String),
    #[error("manifest json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RectoError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RectoError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn read(path: &Path, message: impl Into<String>) -> Self {
        RectoError::Read {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Physical page a render failure is attributed to, when known.
    pub fn page(&self) -> Option<usize> {
        match self {
            RectoError::RenderPage { page, .. } => Some(*page),
            _ => None,
        }
    }
}

pub(crate) fn lopdf_read_err(path: &Path, err: lopdf::Error) -> RectoError {
    RectoError::read(path, err.to_string())
}

pub(crate) fn lopdf_page_err(page: usize, err: lopdf::Error) -> RectoError {
    RectoError::RenderPage {
        page,
        message: err.to_string(),
    }
}
