//! Error taxonomy for the extraction pipeline.
//!
//! Every per-record failure is data: stages convert it into a
//! [`FailureReport`](crate::models::FailureReport) and hand it to the error
//! sink instead of aborting the batch. `anyhow` is only used at the
//! application edge (config loading, CLI, pipeline driver).

use thiserror::Error;

/// A non-recoverable failure for a single record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed link-file line. The line is skipped, the batch continues.
    #[error("invalid link record at line {line}: {message}")]
    Validation { line: usize, message: String },

    /// No extraction queue accepts this format.
    #[error("no extraction queue for format '{format}'")]
    UnroutableFormat { format: String },

    /// The source file is missing or unreadable. Never retried.
    #[error("source file not found: {path}")]
    NotFound { path: String },

    /// Temporary I/O failure that outlived the retry bound.
    #[error("transient I/O failure after {attempts} attempt(s): {message}")]
    TransientIo { attempts: u32, message: String },

    /// Source was read but could not be turned into text.
    #[error("extraction failed: {message}")]
    Extraction { message: String },

    /// The provenance store entry could not be read during classification.
    #[error("provenance store unreadable: {message}")]
    Store { message: String },

    /// Publication failed. The prior artifact pair is left in place.
    #[error("failed to publish: {message}")]
    Write { message: String },
}

impl PipelineError {
    /// Short, stable reason label used in failure reports.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "Validation",
            PipelineError::UnroutableFormat { .. } => "UnroutableFormat",
            PipelineError::NotFound { .. } => "NotFound",
            PipelineError::TransientIo { .. } => "Transient",
            PipelineError::Extraction { .. } => "Malformed",
            PipelineError::Store { .. } => "Store",
            PipelineError::Write { .. } => "Write",
        }
    }
}
