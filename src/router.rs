//! Fan-out from the change detector to the per-family extraction queues.
//!
//! Each extraction family has its own bounded queue and worker pool, so a
//! backlog of heavy PDFs only slows PDF throughput. The router holds no
//! business logic beyond the format to family lookup.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

use crate::config::FormatsConfig;
use crate::error::PipelineError;
use crate::models::{ClassifiedItem, FailureReport, PipelineMessage, Stage};

/// Extraction family; one queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatFamily {
    Standard,
    Pdf,
}

impl FormatFamily {
    pub const ALL: [FormatFamily; 2] = [FormatFamily::Standard, FormatFamily::Pdf];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatFamily::Standard => "Standard",
            FormatFamily::Pdf => "PDF",
        }
    }
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format → family lookup built from `[formats]`.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    families: HashMap<String, FormatFamily>,
}

impl RoutingTable {
    /// Expects a validated config: formats lowercase and in one family only.
    pub fn from_config(formats: &FormatsConfig) -> Self {
        let mut families = HashMap::new();
        for f in &formats.standard {
            families.insert(f.clone(), FormatFamily::Standard);
        }
        for f in &formats.pdf {
            families.insert(f.clone(), FormatFamily::Pdf);
        }
        Self { families }
    }

    pub fn route(&self, format: &str) -> Result<FormatFamily, PipelineError> {
        self.families
            .get(&format.to_lowercase())
            .copied()
            .ok_or_else(|| PipelineError::UnroutableFormat {
                format: format.to_string(),
            })
    }
}

/// Per-family senders handed to the router.
#[derive(Clone)]
pub struct FamilyQueues {
    pub standard: mpsc::Sender<ClassifiedItem>,
    pub pdf: mpsc::Sender<ClassifiedItem>,
}

impl FamilyQueues {
    fn sender(&self, family: FormatFamily) -> &mpsc::Sender<ClassifiedItem> {
        match family {
            FormatFamily::Standard => &self.standard,
            FormatFamily::Pdf => &self.pdf,
        }
    }
}

/// Everything the router forwarded, per family, as wire messages.
#[derive(Debug, Default, Clone)]
pub struct RouterReport {
    pub routed: HashMap<FormatFamily, Vec<PipelineMessage>>,
    pub unroutable: u64,
}

impl RouterReport {
    pub fn count(&self, family: FormatFamily) -> usize {
        self.routed.get(&family).map(Vec::len).unwrap_or(0)
    }
}

pub struct Router {
    table: RoutingTable,
    queues: FamilyQueues,
}

impl Router {
    pub fn new(table: RoutingTable, queues: FamilyQueues) -> Self {
        Self { table, queues }
    }

    pub async fn run(
        self,
        mut input: mpsc::Receiver<ClassifiedItem>,
        errors: mpsc::Sender<FailureReport>,
    ) -> RouterReport {
        let mut report = RouterReport::default();

        while let Some(classified) = input.recv().await {
            let family = match self.table.route(&classified.item.format) {
                Ok(family) => family,
                Err(e) => {
                    tracing::warn!(bibcode = %classified.item.bibcode, error = %e, "unroutable");
                    report.unroutable += 1;
                    let _ = errors
                        .send(FailureReport::new(&classified.item.bibcode, Stage::Route, &e))
                        .await;
                    continue;
                }
            };

            let message =
                PipelineMessage::from_item(&classified.item, Some(classified.classification));
            if self.queues.sender(family).send(classified).await.is_err() {
                tracing::error!(family = %family, "extraction queue closed, stopping router");
                break;
            }
            report.routed.entry(family).or_default().push(message);
        }

        tracing::info!(
            standard = report.count(FormatFamily::Standard),
            pdf = report.count(FormatFamily::Pdf),
            unroutable = report.unroutable,
            "routing finished"
        );
        report
    }
}
