//! Link-file parsing and payload building.
//!
//! A link file has one record per line:
//!
//! ```text
//! bibcode <sep> full_text_path [<sep> provider [<sep> format]]
//! ```
//!
//! `<sep>` is a TAB when the line contains one, otherwise any run of
//! whitespace. Blank lines and `#` comments are ignored. When no format is
//! given it is taken from the file extension of the path.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;

use crate::error::PipelineError;
use crate::models::{FailureReport, LinkRecord, Stage, WorkItem, DEFAULT_PROVIDER};

/// A line the payload builder refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub line: usize,
    /// Bibcode if the line had one, else empty.
    pub bibcode: String,
    pub error: PipelineError,
}

impl RejectedLine {
    pub fn to_report(&self) -> FailureReport {
        let bibcode = if self.bibcode.is_empty() {
            format!("line:{}", self.line)
        } else {
            self.bibcode.clone()
        };
        FailureReport::new(&bibcode, Stage::Payload, &self.error)
    }
}

/// Validated work items, in input order, plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct PayloadBatch {
    pub items: Vec<WorkItem>,
    pub rejected: Vec<RejectedLine>,
}

impl PayloadBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parse a single line. `Ok(None)` for blank lines and comments.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<LinkRecord>, RejectedLine> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = if trimmed.contains('\t') {
        trimmed.split('\t').map(str::trim).collect()
    } else {
        trimmed.split_whitespace().collect()
    };

    let bibcode = fields.first().copied().unwrap_or_default();
    let path = fields.get(1).copied().unwrap_or_default();

    let reject = |message: &str| RejectedLine {
        line: line_no,
        bibcode: bibcode.to_string(),
        error: PipelineError::Validation {
            line: line_no,
            message: message.to_string(),
        },
    };

    if bibcode.is_empty() {
        return Err(reject("missing bibcode"));
    }
    if path.is_empty() {
        return Err(reject("missing full text path"));
    }

    let provider = fields
        .get(2)
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string());
    let format_hint = match fields.get(3).filter(|f| !f.is_empty()) {
        Some(f) => f.trim_start_matches('.').to_lowercase(),
        None => format_from_path(path),
    };

    Ok(Some(LinkRecord {
        line: line_no,
        bibcode: bibcode.to_string(),
        full_text_path: path.to_string(),
        format_hint,
        provider,
    }))
}

/// Lowercased extension of `path`, or an empty string.
pub fn format_from_path(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Parse every line of a link file. Malformed lines are collected, not fatal.
pub fn parse_links(content: &str) -> (Vec<LinkRecord>, Vec<RejectedLine>) {
    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        match parse_line(idx + 1, line) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(r) => rejected.push(r),
        }
    }
    (records, rejected)
}

/// Turn parsed records into work items. The first occurrence of a bibcode wins.
pub fn make_payload(records: Vec<LinkRecord>) -> PayloadBatch {
    let submitted_at = Utc::now();
    let mut seen = HashSet::new();
    let mut batch = PayloadBatch::default();

    for record in records {
        if !seen.insert(record.bibcode.clone()) {
            batch.rejected.push(RejectedLine {
                line: record.line,
                bibcode: record.bibcode.clone(),
                error: PipelineError::Validation {
                    line: record.line,
                    message: format!("duplicate bibcode {}", record.bibcode),
                },
            });
            continue;
        }
        batch.items.push(WorkItem {
            bibcode: record.bibcode,
            provider: record
                .provider
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            full_text_path: record.full_text_path,
            format: record.format_hint,
            submitted_at,
        });
    }

    batch
}

/// Parse and validate link-file content in one step.
pub fn build_payload(content: &str) -> PayloadBatch {
    let (records, mut rejected) = parse_links(content);
    let mut batch = make_payload(records);
    rejected.append(&mut batch.rejected);
    rejected.sort_by_key(|r| r.line);
    batch.rejected = rejected;
    batch
}

pub fn read_links_from_file(path: &Path) -> Result<PayloadBatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read link file: {}", path.display()))?;
    let batch = build_payload(&content);
    tracing::info!(
        path = %path.display(),
        accepted = batch.items.len(),
        rejected = batch.rejected.len(),
        "loaded link file"
    );
    for r in &batch.rejected {
        tracing::warn!(line = r.line, error = %r.error, "skipping link record");
    }
    Ok(batch)
}
