//! Terminal collector for per-record failures.
//!
//! Every stage sends its non-recoverable failures here. The sink never stops
//! the pipeline; it logs each failure and keeps the list for the run summary.

use std::collections::HashMap;
use tokio::sync::{mpsc, watch};

use crate::models::{FailureReport, Stage};

#[derive(Debug, Default, Clone)]
pub struct SinkReport {
    pub failures: Vec<FailureReport>,
}

impl SinkReport {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn by_stage(&self) -> HashMap<Stage, usize> {
        let mut counts = HashMap::new();
        for f in &self.failures {
            *counts.entry(f.stage).or_insert(0) += 1;
        }
        counts
    }

    pub fn for_bibcode(&self, bibcode: &str) -> Option<&FailureReport> {
        self.failures.iter().find(|f| f.bibcode == bibcode)
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ErrorSink {
    depth: watch::Sender<usize>,
}

impl ErrorSink {
    pub fn new() -> Self {
        let (depth, _) = watch::channel(0);
        Self { depth }
    }

    /// Live count of failures collected so far.
    pub fn observe(&self) -> watch::Receiver<usize> {
        self.depth.subscribe()
    }

    /// Collect until every sender has been dropped.
    pub async fn run(self, mut input: mpsc::Receiver<FailureReport>) -> SinkReport {
        let mut report = SinkReport::default();
        while let Some(failure) = input.recv().await {
            tracing::error!(
                bibcode = %failure.bibcode,
                stage = %failure.stage,
                reason = %failure.reason,
                message = %failure.message,
                "record failed"
            );
            report.failures.push(failure);
            self.depth.send_replace(report.failures.len());
        }
        report
    }
}
