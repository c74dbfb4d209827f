//! Change detection.
//!
//! Compares each work item with the provenance descriptor already in the
//! store and decides whether its full text must be extracted again. The
//! comparison never touches the store; replacing an outdated pair is left to
//! the metadata writer so the old pair survives until a new one exists.

use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::models::{Classification, ClassifiedItem, FailureReport, Stage, WorkItem};
use crate::store::{Lookup, Store};

/// Classify one work item against the store.
pub async fn classify(store: &Store, item: &WorkItem) -> Result<Classification, PipelineError> {
    let lookup = store
        .lookup(&item.bibcode)
        .await
        .map_err(|e| PipelineError::Store {
            message: format!("{}: {}", store.meta_path(&item.bibcode).display(), e),
        })?;

    Ok(match lookup {
        Lookup::Missing => Classification::New,
        Lookup::Found(record) if record.ft_source == item.full_text_path => {
            Classification::NoChange
        }
        Lookup::Found(_) => Classification::DifferingFullText,
        Lookup::Corrupt(reason) => {
            tracing::warn!(
                bibcode = %item.bibcode,
                %reason,
                "unparseable provenance descriptor, forcing replacement"
            );
            Classification::DifferingFullText
        }
    })
}

/// Running totals per classification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub new: u64,
    pub differing: u64,
    pub unchanged: u64,
}

impl ClassificationCounts {
    pub fn record(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new += 1,
            Classification::DifferingFullText => self.differing += 1,
            Classification::NoChange => self.unchanged += 1,
        }
    }

    pub fn get(&self, classification: Classification) -> u64 {
        match classification {
            Classification::New => self.new,
            Classification::DifferingFullText => self.differing,
            Classification::NoChange => self.unchanged,
        }
    }

    pub fn total(&self) -> u64 {
        self.new + self.differing + self.unchanged
    }
}

/// What the detector saw once its input is drained.
#[derive(Debug, Default, Clone)]
pub struct DetectorReport {
    pub counts: ClassificationCounts,
    /// Every classified bibcode in arrival order.
    pub outcomes: Vec<(String, Classification)>,
    pub failed: u64,
}

pub struct ChangeDetector {
    store: Store,
}

impl ChangeDetector {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Classify until `input` closes. Items needing extraction go to
    /// `routed`; `NO_CHANGE` items stop here.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<WorkItem>,
        routed: mpsc::Sender<ClassifiedItem>,
        errors: mpsc::Sender<FailureReport>,
    ) -> DetectorReport {
        let mut report = DetectorReport::default();

        while let Some(item) = input.recv().await {
            let classification = match classify(&self.store, &item).await {
                Ok(c) => c,
                Err(e) => {
                    report.failed += 1;
                    let _ = errors
                        .send(FailureReport::new(&item.bibcode, Stage::Check, &e))
                        .await;
                    continue;
                }
            };

            tracing::debug!(
                bibcode = %item.bibcode,
                classification = %classification,
                "classified"
            );
            report.counts.record(classification);
            report
                .outcomes
                .push((item.bibcode.clone(), classification));

            if !classification.needs_extraction() {
                continue;
            }

            let classified = ClassifiedItem {
                item,
                classification,
            };
            if routed.send(classified).await.is_err() {
                tracing::error!("router input closed, stopping change detector");
                break;
            }
        }

        tracing::info!(
            new = report.counts.new,
            differing = report.counts.differing,
            unchanged = report.counts.unchanged,
            failed = report.failed,
            "change detection finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProvenanceRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    fn item(bibcode: &str, path: &str) -> WorkItem {
        WorkItem {
            bibcode: bibcode.to_string(),
            provider: "mnras".to_string(),
            full_text_path: path.to_string(),
            format: "txt".to_string(),
            submitted_at: Utc::now(),
        }
    }

    fn seed(store: &Store, bibcode: &str, ft_source: &str) {
        let dir = store.bibcode_dir(bibcode);
        std::fs::create_dir_all(&dir).unwrap();
        let record = ProvenanceRecord {
            index_date: "2015-01-01T00:00:00Z".to_string(),
            bibcode: bibcode.to_string(),
            provider: "mnras".to_string(),
            ft_source: ft_source.to_string(),
        };
        std::fs::write(
            dir.join(crate::store::META_FILE),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn classifies_against_stored_provenance() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        seed(&store, "same", "/ft/same.txt");
        seed(&store, "test4", "wrong_source");

        assert_eq!(
            classify(&store, &item("fresh", "/ft/fresh.txt")).await.unwrap(),
            Classification::New
        );
        assert_eq!(
            classify(&store, &item("same", "/ft/same.txt")).await.unwrap(),
            Classification::NoChange
        );
        assert_eq!(
            classify(&store, &item("test4", "/ft/test4.txt")).await.unwrap(),
            Classification::DifferingFullText
        );
    }

    #[tokio::test]
    async fn corrupt_descriptor_forces_replacement() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let dir = store.bibcode_dir("broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(crate::store::META_FILE), "not json").unwrap();

        assert_eq!(
            classify(&store, &item("broken", "/ft/broken.txt")).await.unwrap(),
            Classification::DifferingFullText
        );
    }

    #[tokio::test]
    async fn unchanged_items_are_not_forwarded() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        seed(&store, "same", "/ft/same.txt");

        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (err_tx, mut err_rx) = mpsc::channel(8);

        in_tx.send(item("same", "/ft/same.txt")).await.unwrap();
        in_tx.send(item("fresh", "/ft/fresh.txt")).await.unwrap();
        drop(in_tx);

        let report = ChangeDetector::new(store).run(in_rx, out_tx, err_tx).await;
        assert_eq!(report.counts.unchanged, 1);
        assert_eq!(report.counts.new, 1);
        assert_eq!(report.counts.total(), 2);

        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(forwarded.item.bibcode, "fresh");
        assert_eq!(forwarded.classification, Classification::New);
        assert!(out_rx.recv().await.is_none());
        assert!(err_rx.recv().await.is_none());
    }
}
