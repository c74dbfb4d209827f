//! Pipeline orchestration.
//!
//! Wires the stages together with bounded channels and runs them as
//! independent tasks:
//!
//! ```text
//! payload ─▶ detector ─▶ router ─┬─▶ standard pool ─┐
//!                                └─▶ pdf pool ──────┴─▶ shard dispatch ─▶ writer × N
//!     └──────────┴───────────┴──────────┴───────────────────────┴─────────▶ error sink
//! ```
//!
//! Completion is signalled by channel closure: once the payload is fed, each
//! stage drains its input, drops its senders and returns a report. No stage
//! waits on a timer.

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::detect::{ChangeDetector, DetectorReport};
use crate::extract::{pools_from_config, PoolReport};
use crate::lifecycle::Ledger;
use crate::links::PayloadBatch;
use crate::models::{ClassifiedItem, ExtractedItem, FailureReport, WorkItem};
use crate::router::{FamilyQueues, FormatFamily, Router, RouterReport, RoutingTable};
use crate::sink::{ErrorSink, SinkReport};
use crate::store::Store;
use crate::writer::{shard_for, MetadataWriter, WriterReport};

/// Everything a full run did.
#[derive(Debug)]
pub struct RunSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub detector: DetectorReport,
    pub router: RouterReport,
    pub pools: Vec<PoolReport>,
    pub writers: Vec<WriterReport>,
    pub errors: SinkReport,
    pub ledger: Ledger,
}

impl RunSummary {
    pub fn written(&self) -> usize {
        self.writers.iter().map(|w| w.written.len()).sum()
    }

    pub fn print(&self) {
        let counts = &self.detector.counts;
        println!("run");
        println!("  records accepted: {}", self.accepted);
        println!("  records rejected: {}", self.rejected);
        println!("  NEW: {}", counts.new);
        println!("  DIFFERING_FULL_TEXT: {}", counts.differing);
        println!("  NO_CHANGE: {}", counts.unchanged);
        for family in FormatFamily::ALL {
            println!("  queued {}: {}", family, self.router.count(family));
        }
        println!("  written: {}", self.written());
        println!("  errors: {}", self.errors.len());
        for f in &self.errors.failures {
            println!("    {} [{}] {}: {}", f.bibcode, f.stage, f.reason, f.message);
        }
        let unfinished = self.ledger.unfinished();
        if !unfinished.is_empty() {
            println!("  unfinished: {}", unfinished.join(", "));
        }
        println!("ok");
    }
}

/// Classification and routing only, no extraction or writes.
#[derive(Debug)]
pub struct CheckSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub detector: DetectorReport,
    pub router: RouterReport,
    pub errors: SinkReport,
}

impl CheckSummary {
    pub fn print(&self) {
        let counts = &self.detector.counts;
        println!("check (dry-run)");
        println!("  records accepted: {}", self.accepted);
        println!("  records rejected: {}", self.rejected);
        println!("  NEW: {}", counts.new);
        println!("  DIFFERING_FULL_TEXT: {}", counts.differing);
        println!("  NO_CHANGE: {}", counts.unchanged);
        for family in FormatFamily::ALL {
            println!("  would queue {}: {}", family, self.router.count(family));
        }
        println!("  errors: {}", self.errors.len());
    }
}

async fn feed(
    batch: PayloadBatch,
    ingest: mpsc::Sender<WorkItem>,
    errors: &mpsc::Sender<FailureReport>,
) {
    for rejected in &batch.rejected {
        let _ = errors.send(rejected.to_report()).await;
    }
    for item in batch.items {
        if ingest.send(item).await.is_err() {
            tracing::error!("change detector input closed, stopping feed");
            break;
        }
    }
}

/// Route every extracted item to the writer instance that owns its bibcode.
async fn dispatch_to_shards(
    mut input: mpsc::Receiver<ExtractedItem>,
    shards: Vec<mpsc::Sender<ExtractedItem>>,
) {
    while let Some(extracted) = input.recv().await {
        let shard = shard_for(&extracted.classified.item.bibcode, shards.len());
        if shards[shard].send(extracted).await.is_err() {
            tracing::error!(shard, "writer input closed, stopping dispatch");
            break;
        }
    }
}

/// Run the full pipeline over `batch` and wait for every stage to drain.
pub async fn run_pipeline(config: &Config, batch: PayloadBatch) -> Result<RunSummary> {
    let store = Store::new(&config.store.root);
    std::fs::create_dir_all(store.root()).with_context(|| {
        format!("Failed to create store root: {}", store.root().display())
    })?;

    let capacity = config.queues.capacity;
    let accepted = batch.len();
    let rejected = batch.rejected.len();

    let (errors_tx, errors_rx) = mpsc::channel::<FailureReport>(capacity);
    let (ingest_tx, ingest_rx) = mpsc::channel(capacity);
    let (routed_tx, routed_rx) = mpsc::channel::<ClassifiedItem>(capacity);
    let (standard_tx, standard_rx) = mpsc::channel::<ClassifiedItem>(capacity);
    let (pdf_tx, pdf_rx) = mpsc::channel::<ClassifiedItem>(capacity);
    let (extracted_tx, extracted_rx) = mpsc::channel::<ExtractedItem>(capacity);

    let sink = tokio::spawn(ErrorSink::new().run(errors_rx));

    let detector = tokio::spawn(ChangeDetector::new(store.clone()).run(
        ingest_rx,
        routed_tx,
        errors_tx.clone(),
    ));

    let router = tokio::spawn(
        Router::new(
            RoutingTable::from_config(&config.formats),
            FamilyQueues {
                standard: standard_tx,
                pdf: pdf_tx,
            },
        )
        .run(routed_rx, errors_tx.clone()),
    );

    let (standard_pool, pdf_pool) = pools_from_config(&config.extraction);
    let standard = tokio::spawn(standard_pool.run(standard_rx, extracted_tx.clone()));
    let pdf = tokio::spawn(pdf_pool.run(pdf_rx, extracted_tx));

    let mut shard_senders = Vec::with_capacity(config.writer.instances);
    let mut writers = Vec::with_capacity(config.writer.instances);
    for _ in 0..config.writer.instances {
        let (tx, rx) = mpsc::channel::<ExtractedItem>(capacity);
        shard_senders.push(tx);
        writers.push(tokio::spawn(
            MetadataWriter::new(store.clone()).run(rx, errors_tx.clone()),
        ));
    }
    let dispatch = tokio::spawn(dispatch_to_shards(extracted_rx, shard_senders));

    feed(batch, ingest_tx, &errors_tx).await;
    drop(errors_tx);

    let detector = detector.await.context("change detector task failed")?;
    let router = router.await.context("router task failed")?;
    let pools = vec![
        standard.await.context("standard extractor pool failed")?,
        pdf.await.context("pdf extractor pool failed")?,
    ];
    dispatch.await.context("shard dispatch task failed")?;
    let mut writer_reports = Vec::with_capacity(writers.len());
    for writer in writers {
        writer_reports.push(writer.await.context("metadata writer task failed")?);
    }
    let errors = sink.await.context("error sink task failed")?;

    let ledger = Ledger::replay(&detector, &writer_reports, &errors);

    Ok(RunSummary {
        accepted,
        rejected,
        detector,
        router,
        pools,
        writers: writer_reports,
        errors,
        ledger,
    })
}

/// Classify and route without extracting. Queues are drained and counted.
pub async fn run_check(config: &Config, batch: PayloadBatch) -> Result<CheckSummary> {
    let store = Store::new(&config.store.root);
    let capacity = config.queues.capacity;
    let accepted = batch.len();
    let rejected = batch.rejected.len();

    let (errors_tx, errors_rx) = mpsc::channel::<FailureReport>(capacity);
    let (ingest_tx, ingest_rx) = mpsc::channel(capacity);
    let (routed_tx, routed_rx) = mpsc::channel::<ClassifiedItem>(capacity);
    let (standard_tx, standard_rx) = mpsc::channel::<ClassifiedItem>(capacity);
    let (pdf_tx, pdf_rx) = mpsc::channel::<ClassifiedItem>(capacity);

    let sink = tokio::spawn(ErrorSink::new().run(errors_rx));
    let detector = tokio::spawn(ChangeDetector::new(store).run(
        ingest_rx,
        routed_tx,
        errors_tx.clone(),
    ));
    let router = tokio::spawn(
        Router::new(
            RoutingTable::from_config(&config.formats),
            FamilyQueues {
                standard: standard_tx,
                pdf: pdf_tx,
            },
        )
        .run(routed_rx, errors_tx.clone()),
    );
    let drains = [standard_rx, pdf_rx].map(|mut rx| {
        tokio::spawn(async move { while rx.recv().await.is_some() {} })
    });

    feed(batch, ingest_tx, &errors_tx).await;
    drop(errors_tx);

    let detector = detector.await.context("change detector task failed")?;
    let router = router.await.context("router task failed")?;
    for drain in drains {
        drain.await.context("queue drain failed")?;
    }
    let errors = sink.await.context("error sink task failed")?;

    Ok(CheckSummary {
        accepted,
        rejected,
        detector,
        router,
        errors,
    })
}
