//! Error taxonomy for the spot pipeline
//!
//! Every failure that can end the processing of one input file maps to
//! exactly one variant here. The orchestrator catches these per file and
//! keeps going with the next one.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// File name does not follow the `<mag>X-<sample>_z<n>c<channel>.<ext>` convention
    #[error("unrecognized file name '{file}': {reason}")]
    MetadataFormat { file: String, reason: String },

    /// Unreadable, corrupt or unsupported image data
    #[error("cannot read image {path}: {reason}")]
    ImageRead { path: PathBuf, reason: String },

    /// Database I/O or schema failure
    #[error("spot store {path}: {reason}")]
    StorageWrite { path: PathBuf, reason: String },

    /// Visualization could not be produced or written
    #[error("cannot render {path}: {reason}")]
    Render { path: PathBuf, reason: String },

    /// Invalid or unreadable configuration file
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn image_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::ImageRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        PipelineError::StorageWrite {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn render(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Render {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short stage name used in the batch summary
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::MetadataFormat { .. } => "metadata",
            PipelineError::ImageRead { .. } => "load",
            PipelineError::StorageWrite { .. } => "store",
            PipelineError::Render { .. } => "render",
            PipelineError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
