//! Format extractors and their worker pools.
//!
//! Extraction is a pluggable capability: given the path of a source file,
//! produce plain UTF-8 text or fail. Two implementations ship with the
//! pipeline:
//!
//! - [`StandardExtractor`] for plain and markup text (`txt`, `ocr`, `xml`,
//!   `html`, ...). Markup is reduced to its text nodes.
//! - [`PdfExtractor`] for PDFs, run on a blocking thread.
//!
//! Each family is served by an [`ExtractorPool`] with its own concurrency
//! bound. Missing or unreadable sources fail immediately; transient I/O
//! failures are retried with exponential backoff up to a fixed number of
//! attempts.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::error::PipelineError;
use crate::models::{ClassifiedItem, ExtractedItem, ExtractionResult, FailureReason};
use crate::router::FormatFamily;

/// Extensions whose content is markup and gets reduced to text nodes.
const MARKUP_EXTENSIONS: &[&str] = &["xml", "teixml", "elsevier", "html", "htm", "xhtml"];
/// Elements whose text content is never part of the full text.
const SKIPPED_ELEMENTS: &[&[u8]] = &[b"script", b"style"];
/// Upper bound on the delay between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Capability-level extraction failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("source missing or unreadable: {0}")]
    NotFound(String),
    #[error("temporary I/O failure: {0}")]
    Transient(String),
    #[error("could not extract text: {0}")]
    Malformed(String),
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::Transient(_))
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            ExtractError::NotFound(_) => FailureReason::NotFound,
            ExtractError::Transient(_) => FailureReason::Transient,
            ExtractError::Malformed(_) => FailureReason::Malformed,
        }
    }
}

/// Map an I/O error opening `path` onto permanent vs. transient failure.
///
/// Only kinds that can clear up on their own are transient. Anything else
/// (missing, a directory, an invalid path, no permission) leaves the source
/// unreadable and is reported as `NotFound`.
fn io_error(path: &Path, e: std::io::Error) -> ExtractError {
    let msg = format!("{}: {}", path.display(), e);
    match e.kind() {
        ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::TimedOut
        | ErrorKind::ResourceBusy => ExtractError::Transient(msg),
        ErrorKind::InvalidData => ExtractError::Malformed(msg),
        _ => ExtractError::NotFound(msg),
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn family(&self) -> FormatFamily;

    async fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Plain and markup text.
#[derive(Debug, Default, Clone)]
pub struct StandardExtractor;

#[async_trait]
impl Extractor for StandardExtractor {
    fn family(&self) -> FormatFamily {
        FormatFamily::Standard
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        if is_markup(path, &bytes) {
            extract_markup_text(&bytes)
        } else {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn is_markup(path: &Path, bytes: &[u8]) -> bool {
    let by_extension = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            MARKUP_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false);
    by_extension || bytes.trim_ascii_start().starts_with(b"<?xml")
}

/// Concatenate the text nodes of an XML/HTML document.
fn extract_markup_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut out = String::new();
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if skip_depth > 0 || SKIPPED_ELEMENTS.contains(&e.local_name().as_ref()) {
                    skip_depth += 1;
                }
            }
            Ok(Event::End(_)) => {
                skip_depth = skip_depth.saturating_sub(1);
            }
            Ok(Event::Text(te)) if skip_depth == 0 => {
                let text = te
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&te).into_owned());
                push_fragment(&mut out, &text);
            }
            Ok(Event::CData(cd)) if skip_depth == 0 => {
                push_fragment(&mut out, &String::from_utf8_lossy(&cd));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Malformed(format!(
                    "markup error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn push_fragment(out: &mut String, fragment: &str) {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(fragment);
}

/// PDF text via `pdf-extract`.
#[derive(Debug, Default, Clone)]
pub struct PdfExtractor;

#[async_trait]
impl Extractor for PdfExtractor {
    fn family(&self) -> FormatFamily {
        FormatFamily::Pdf
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ExtractError::Malformed(format!("PDF extractor aborted: {}", e)))?
        .map_err(|e| ExtractError::Malformed(format!("PDF extraction failed: {}", e)))
    }
}

/// Retry policy shared by every pool.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        // backoff, 2x backoff, 4x backoff, ...
        let factor = 1u32 << (attempt.saturating_sub(1)).min(5);
        (self.backoff * factor).min(MAX_BACKOFF)
    }
}

/// Run `extractor` on `path`, retrying transient failures.
pub async fn extract_with_retry(
    extractor: &dyn Extractor,
    path: &Path,
    policy: RetryPolicy,
) -> Result<String, (ExtractError, u32)> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match extractor.extract(path).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    path = %path.display(),
                    attempt,
                    max_attempts,
                    error = %e,
                    "transient extraction failure, retrying"
                );
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// Convert a final extraction failure into the pipeline taxonomy.
pub fn to_pipeline_error(error: &ExtractError, attempts: u32) -> PipelineError {
    match error {
        ExtractError::NotFound(path) => PipelineError::NotFound { path: path.clone() },
        ExtractError::Transient(message) => PipelineError::TransientIo {
            attempts,
            message: message.clone(),
        },
        ExtractError::Malformed(message) => PipelineError::Extraction {
            message: message.clone(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct PoolReport {
    pub family: FormatFamily,
    pub extracted: u64,
    pub failed: u64,
}

/// A bounded pool of workers consuming one family's queue.
pub struct ExtractorPool {
    extractor: Arc<dyn Extractor>,
    workers: usize,
    policy: RetryPolicy,
}

impl ExtractorPool {
    pub fn new(extractor: Arc<dyn Extractor>, workers: usize, policy: RetryPolicy) -> Self {
        Self {
            extractor,
            workers: workers.max(1),
            policy,
        }
    }

    pub fn family(&self) -> FormatFamily {
        self.extractor.family()
    }

    /// Extract until `input` closes and every in-flight task has finished.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<ClassifiedItem>,
        output: mpsc::Sender<ExtractedItem>,
    ) -> PoolReport {
        let family = self.family();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut report = PoolReport {
            family,
            extracted: 0,
            failed: 0,
        };

        tracing::info!(family = %family, workers = self.workers, "extractor pool started");

        while let Some(classified) = input.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let extractor = self.extractor.clone();
            let output = output.clone();
            let policy = self.policy;

            tasks.spawn(async move {
                let _permit = permit;
                let bibcode = classified.item.bibcode.clone();
                let path = Path::new(&classified.item.full_text_path).to_path_buf();

                let result = match extract_with_retry(extractor.as_ref(), &path, policy).await {
                    Ok(text) => {
                        tracing::debug!(%bibcode, bytes = text.len(), "extracted");
                        ExtractionResult::ok(&bibcode, text)
                    }
                    Err((e, attempts)) => {
                        let err = to_pipeline_error(&e, attempts);
                        tracing::warn!(%bibcode, error = %err, "extraction failed");
                        ExtractionResult::failed(&bibcode, e.reason(), err.to_string())
                    }
                };
                let ok = result.is_ok();
                if output.send(ExtractedItem { classified, result }).await.is_err() {
                    tracing::error!(%bibcode, "writer input closed, dropping result");
                }
                ok
            });

            while let Some(done) = tasks.try_join_next() {
                tally(&mut report, done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            tally(&mut report, done);
        }

        tracing::info!(
            family = %family,
            extracted = report.extracted,
            failed = report.failed,
            "extractor pool drained"
        );
        report
    }
}

fn tally(report: &mut PoolReport, done: Result<bool, tokio::task::JoinError>) {
    match done {
        Ok(true) => report.extracted += 1,
        Ok(false) => report.failed += 1,
        Err(e) => {
            tracing::error!(error = %e, "extraction task aborted");
            report.failed += 1;
        }
    }
}

/// Build the pool for each family from config.
pub fn pools_from_config(config: &crate::config::ExtractionConfig) -> (ExtractorPool, ExtractorPool) {
    let policy = RetryPolicy {
        max_attempts: config.max_attempts,
        backoff: config.retry_backoff(),
    };
    (
        ExtractorPool::new(Arc::new(StandardExtractor), config.standard_workers, policy),
        ExtractorPool::new(Arc::new(PdfExtractor), config.pdf_workers, policy),
    )
}
