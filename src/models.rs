//! Core data models that flow through the extraction pipeline.
//!
//! A link-file line becomes a [`LinkRecord`], is validated into a
//! [`WorkItem`], classified into a [`ClassifiedItem`], extracted into an
//! [`ExtractedItem`] and finally published as a [`ProvenanceRecord`] plus a
//! text artifact. Failures at any point become a [`FailureReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// Provider recorded when the link file does not name one.
pub const DEFAULT_PROVIDER: &str = "unknown";

/// One parsed line of a link file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// 1-based line number in the source file.
    pub line: usize,
    pub bibcode: String,
    pub full_text_path: String,
    pub format_hint: String,
    pub provider: Option<String>,
}

/// Validated unit of work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub bibcode: String,
    pub provider: String,
    pub full_text_path: String,
    pub format: String,
    pub submitted_at: DateTime<Utc>,
}

/// Persisted provenance descriptor (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub index_date: String,
    pub bibcode: String,
    pub provider: String,
    pub ft_source: String,
}

/// Outcome of comparing a work item against stored provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    New,
    DifferingFullText,
    NoChange,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::New => "NEW",
            Classification::DifferingFullText => "DIFFERING_FULL_TEXT",
            Classification::NoChange => "NO_CHANGE",
        }
    }

    /// Whether the item continues to the extraction queues.
    pub fn needs_extraction(&self) -> bool {
        !matches!(self, Classification::NoChange)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work item annotated with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedItem {
    pub item: WorkItem,
    pub classification: Classification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtractionStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    NotFound,
    Transient,
    Malformed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NotFound => "NotFound",
            FailureReason::Transient => "Transient",
            FailureReason::Malformed => "Malformed",
        }
    }
}

/// Transient output of an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub bibcode: String,
    pub text: String,
    pub status: ExtractionStatus,
    pub reason: Option<FailureReason>,
    /// Human-readable detail accompanying a failure.
    pub detail: Option<String>,
}

impl ExtractionResult {
    pub fn ok(bibcode: &str, text: String) -> Self {
        Self {
            bibcode: bibcode.to_string(),
            text,
            status: ExtractionStatus::Ok,
            reason: None,
            detail: None,
        }
    }

    pub fn failed(bibcode: &str, reason: FailureReason, detail: String) -> Self {
        Self {
            bibcode: bibcode.to_string(),
            text: String::new(),
            status: ExtractionStatus::Failed,
            reason: Some(reason),
            detail: Some(detail),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExtractionStatus::Ok
    }
}

/// What an extractor hands to the metadata writer.
#[derive(Debug, Clone)]
pub struct ExtractedItem {
    pub classified: ClassifiedItem,
    pub result: ExtractionResult,
}

/// Pipeline stage names used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Payload,
    Check,
    Route,
    Extract,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Payload => "payload",
            Stage::Check => "check",
            Stage::Route => "route",
            Stage::Extract => "extract",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record the error sink collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub bibcode: String,
    pub stage: Stage,
    pub reason: String,
    pub message: String,
}

impl FailureReport {
    pub fn new(bibcode: &str, stage: Stage, error: &PipelineError) -> Self {
        Self {
            bibcode: bibcode.to_string(),
            stage,
            reason: error.reason().to_string(),
            message: error.to_string(),
        }
    }
}

/// Transport-agnostic inter-stage message.
///
/// The classification travels under the fixed `UPDATE` key with the literal
/// values `NEW`, `DIFFERING_FULL_TEXT` and `NO_CHANGE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub bibcode: String,
    pub provider: String,
    pub ft_source: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_date: Option<String>,
    #[serde(
        rename = "UPDATE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update: Option<Classification>,
}

impl PipelineMessage {
    pub fn from_item(item: &WorkItem, update: Option<Classification>) -> Self {
        Self {
            bibcode: item.bibcode.clone(),
            provider: item.provider.clone(),
            ft_source: item.full_text_path.clone(),
            format: item.format.clone(),
            index_date: None,
            update,
        }
    }

    /// Rebuild a work item, rejecting messages missing required fields.
    pub fn into_work_item(self) -> Result<WorkItem, PipelineError> {
        if self.bibcode.trim().is_empty() {
            return Err(PipelineError::Validation {
                line: 0,
                message: "message has an empty bibcode".to_string(),
            });
        }
        if self.ft_source.trim().is_empty() {
            return Err(PipelineError::Validation {
                line: 0,
                message: format!("message for {} has an empty ft_source", self.bibcode),
            });
        }
        Ok(WorkItem {
            bibcode: self.bibcode,
            provider: self.provider,
            full_text_path: self.ft_source,
            format: self.format.to_lowercase(),
            submitted_at: Utc::now(),
        })
    }
}
