//! Publication of extraction results to the canonical store.
//!
//! A bibcode directory always holds `meta.json` and `fulltext.txt` together.
//! The writer never edits a live directory in place; it builds the complete
//! new pair in a sibling staging directory and swaps it in:
//!
//! ```text
//! .obj.staging-<id>/{fulltext.txt,meta.json}   write + fsync
//! obj            → .obj.retired-<id>           move prior pair aside
//! .obj.staging-<id> → obj                      publish
//! .obj.retired-<id>                            delete
//! ```
//!
//! If publishing fails the prior pair is moved back and stays authoritative.
//! A crash between the two renames is repaired by the next publication of
//! the same bibcode, or store-wide by [`Store::sweep`] while no writer runs.
//!
//! Only one writer may own a bibcode at a time. The pipeline guarantees this
//! by sharding bibcodes across writer instances with [`shard_for`] rather
//! than by locking.

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{
    Classification, ExtractedItem, FailureReport, ProvenanceRecord, Stage, WorkItem,
};
use crate::store::{
    recover_leftovers, Store, META_FILE, RETIRED_MARKER, STAGING_MARKER, TEXT_FILE,
};

/// Writer instance that owns `bibcode` out of `instances`.
pub fn shard_for(bibcode: &str, instances: usize) -> usize {
    if instances <= 1 {
        return 0;
    }
    let digest = Sha256::digest(bibcode.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % instances as u64) as usize
}

/// Staging directory removed on drop unless committed.
struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    fn create(path: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir(&path)?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "could not remove staging directory");
            }
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Replace whatever lives at `dir` with a fresh `meta.json` + `fulltext.txt`.
fn publish_pair(dir: &Path, meta: &[u8], text: &[u8]) -> std::io::Result<()> {
    publish_pair_with(dir, meta, text, |from, to| std::fs::rename(from, to))
}

fn publish_pair_with<R>(dir: &Path, meta: &[u8], text: &[u8], rename: R) -> std::io::Result<()>
where
    R: Fn(&Path, &Path) -> std::io::Result<()>,
{
    let parent = dir.parent().ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidInput, "bibcode directory has no parent")
    })?;
    let leaf = dir
        .file_name()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "bibcode directory has no name"))?
        .to_string_lossy()
        .to_string();
    std::fs::create_dir_all(parent)?;

    // This writer owns the bibcode, so leftovers of an interrupted earlier
    // publication of it are ours to repair.
    let recovered = recover_leftovers(dir)?;
    if recovered.removed + recovered.restored > 0 {
        tracing::warn!(
            path = %dir.display(),
            removed = recovered.removed,
            restored = recovered.restored,
            "repaired interrupted publication"
        );
    }

    let token = Uuid::new_v4().simple().to_string();
    let staging = StagingDir::create(parent.join(format!(".{}{}{}", leaf, STAGING_MARKER, token)))?;
    write_synced(&staging.path().join(TEXT_FILE), text)?;
    write_synced(&staging.path().join(META_FILE), meta)?;
    sync_dir(staging.path())?;

    let retired = parent.join(format!(".{}{}{}", leaf, RETIRED_MARKER, token));
    let had_prior = match rename(dir, retired.as_path()) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    if let Err(e) = rename(staging.path(), dir) {
        if had_prior {
            if let Err(restore) = rename(retired.as_path(), dir) {
                tracing::error!(
                    path = %retired.display(),
                    error = %restore,
                    "could not restore prior pair; run `ftx sweep`"
                );
            }
        }
        return Err(e);
    }
    staging.commit();

    // The new pair is live from here on; nothing below may report failure.
    if had_prior {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            tracing::warn!(path = %retired.display(), error = %e, "could not remove retired pair");
        }
    }
    if let Err(e) = sync_dir(parent) {
        tracing::warn!(path = %parent.display(), error = %e, "could not sync store directory");
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct WriterReport {
    /// Bibcodes published, with the classification that sent them here.
    pub written: Vec<(String, Classification)>,
    pub write_failures: u64,
    /// Failed extraction results forwarded to the error sink untouched.
    pub forwarded_failures: u64,
}

pub struct MetadataWriter {
    store: Store,
}

impl MetadataWriter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Publish `text` as the new canonical state of `item.bibcode`.
    pub async fn publish(
        &self,
        item: &WorkItem,
        text: &str,
    ) -> Result<ProvenanceRecord, PipelineError> {
        let record = ProvenanceRecord {
            index_date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            bibcode: item.bibcode.clone(),
            provider: item.provider.clone(),
            ft_source: item.full_text_path.clone(),
        };
        let meta = serde_json::to_vec(&record).map_err(|e| PipelineError::Write {
            message: e.to_string(),
        })?;
        let dir = self.store.bibcode_dir(&item.bibcode);
        let text = text.as_bytes().to_vec();

        let target = dir.clone();
        tokio::task::spawn_blocking(move || publish_pair(&target, &meta, &text))
            .await
            .map_err(|e| PipelineError::Write {
                message: format!("publication task aborted: {}", e),
            })?
            .map_err(|e| PipelineError::Write {
                message: format!("{}: {}", dir.display(), e),
            })?;

        Ok(record)
    }

    /// Publish until `input` closes. Failed extractions are not written;
    /// they go to the error sink and the prior pair stays in place.
    pub async fn run(
        self,
        mut input: mpsc::Receiver<ExtractedItem>,
        errors: mpsc::Sender<FailureReport>,
    ) -> WriterReport {
        let mut report = WriterReport::default();

        while let Some(ExtractedItem { classified, result }) = input.recv().await {
            let bibcode = classified.item.bibcode.clone();

            if !result.is_ok() {
                report.forwarded_failures += 1;
                let reason = result
                    .reason
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                let failure = FailureReport {
                    bibcode,
                    stage: Stage::Extract,
                    reason,
                    message: result.detail.unwrap_or_default(),
                };
                let _ = errors.send(failure).await;
                continue;
            }

            match self.publish(&classified.item, &result.text).await {
                Ok(_) => {
                    tracing::debug!(
                        %bibcode,
                        classification = %classified.classification,
                        "published"
                    );
                    report.written.push((bibcode, classified.classification));
                }
                Err(e) => {
                    tracing::warn!(%bibcode, error = %e, "publication failed");
                    report.write_failures += 1;
                    let _ = errors
                        .send(FailureReport::new(&bibcode, Stage::Write, &e))
                        .await;
                }
            }
        }

        tracing::info!(
            written = report.written.len(),
            write_failures = report.write_failures,
            forwarded_failures = report.forwarded_failures,
            "metadata writer finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedItem, ExtractionResult, FailureReason};
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

    fn read_meta(store: &Store, bibcode: &str) -> ProvenanceRecord {
        serde_json::from_slice(&std::fs::read(store.meta_path(bibcode)).unwrap()).unwrap()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn sharding_is_stable_and_in_range() {
        for bibcode in ["test1", "test4", "2015MNRAS.447.1618S"] {
            let shard = shard_for(bibcode, 4);
            assert!(shard < 4);
            assert_eq!(shard, shard_for(bibcode, 4));
            assert_eq!(shard_for(bibcode, 1), 0);
        }
    }

    #[tokio::test]
    async fn publish_writes_exactly_one_pair() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let writer = MetadataWriter::new(store.clone());

        let record = writer
            .publish(&item("test1", "/ft/test1.txt"), "fresh text")
            .await
            .unwrap();
        assert_eq!(record.ft_source, "/ft/test1.txt");
        assert!(record.index_date.ends_with('Z'));

        let dir = store.bibcode_dir("test1");
        assert_eq!(dir_entries(&dir), vec![TEXT_FILE.to_string(), META_FILE.to_string()]);
        assert_eq!(std::fs::read_to_string(store.text_path("test1")).unwrap(), "fresh text");
        assert_eq!(read_meta(&store, "test1"), record);
        assert!(dir_entries(dir.parent().unwrap()).iter().all(|n| !n.starts_with('.')));
    }

    #[tokio::test]
    async fn replacement_supersedes_the_whole_prior_pair() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let writer = MetadataWriter::new(store.clone());

        writer
            .publish(&item("test4", "wrong_source"), "old text")
            .await
            .unwrap();
        std::fs::write(store.bibcode_dir("test4").join("stale.txt"), "junk").unwrap();

        writer
            .publish(&item("test4", "/ft/test4.txt"), "new text")
            .await
            .unwrap();

        let dir = store.bibcode_dir("test4");
        assert_eq!(dir_entries(&dir), vec![TEXT_FILE.to_string(), META_FILE.to_string()]);
        assert_eq!(std::fs::read_to_string(store.text_path("test4")).unwrap(), "new text");
        assert_eq!(read_meta(&store, "test4").ft_source, "/ft/test4.txt");
        assert!(store.audit().unwrap().leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_extraction_writes_nothing_and_is_forwarded() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        MetadataWriter::new(store.clone())
            .publish(&item("kept", "/ft/old.txt"), "old text")
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(4);
        let (err_tx, mut err_rx) = mpsc::channel(4);
        tx.send(ExtractedItem {
            classified: ClassifiedItem {
                item: item("kept", "/ft/new.txt"),
                classification: Classification::DifferingFullText,
            },
            result: ExtractionResult::failed(
                "kept",
                FailureReason::NotFound,
                "source file not found: /ft/new.txt".to_string(),
            ),
        })
        .await
        .unwrap();
        drop(tx);

        let report = MetadataWriter::new(store.clone()).run(rx, err_tx).await;
        assert!(report.written.is_empty());
        assert_eq!(report.forwarded_failures, 1);

        let failure = err_rx.recv().await.unwrap();
        assert_eq!(failure.stage, Stage::Extract);
        assert_eq!(failure.reason, "NotFound");
        assert_eq!(read_meta(&store, "kept").ft_source, "/ft/old.txt");
        assert_eq!(std::fs::read_to_string(store.text_path("kept")).unwrap(), "old text");
    }

    #[tokio::test]
    async fn failed_swap_keeps_the_prior_pair() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let prior = MetadataWriter::new(store.clone())
            .publish(&item("test4", "/ft/old.txt"), "old text")
            .await
            .unwrap();
        let dir = store.bibcode_dir("test4");

        // The prior pair moves aside, then publishing the staged pair fails.
        let err = publish_pair_with(&dir, b"{}", b"new text", |from, to| {
            if from.to_string_lossy().contains(STAGING_MARKER) {
                Err(std::io::Error::new(ErrorKind::Other, "disk full"))
            } else {
                std::fs::rename(from, to)
            }
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "disk full");

        assert_eq!(dir_entries(&dir), vec![TEXT_FILE.to_string(), META_FILE.to_string()]);
        assert_eq!(read_meta(&store, "test4"), prior);
        assert_eq!(std::fs::read_to_string(store.text_path("test4")).unwrap(), "old text");
        assert_eq!(dir_entries(dir.parent().unwrap()), vec!["obj".to_string()]);
    }

    #[tokio::test]
    async fn publish_repairs_only_its_own_leftovers() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path());
        let dir = store.bibcode_dir("test1");
        let parent = dir.parent().unwrap().to_path_buf();

        // Crash between the renames: only the retired copy survived.
        let retired = parent.join(".obj.retired-abc");
        std::fs::create_dir_all(&retired).unwrap();
        std::fs::write(retired.join(META_FILE), "{}").unwrap();
        std::fs::write(retired.join(TEXT_FILE), "old").unwrap();
        std::fs::create_dir_all(parent.join(".obj.staging-def")).unwrap();

        let other = store.bibcode_dir("other").parent().unwrap().join(".obj.staging-inflight");
        std::fs::create_dir_all(&other).unwrap();

        MetadataWriter::new(store.clone())
            .publish(&item("test1", "/ft/test1.txt"), "fresh text")
            .await
            .unwrap();

        assert_eq!(dir_entries(&parent), vec!["obj".to_string()]);
        assert_eq!(std::fs::read_to_string(store.text_path("test1")).unwrap(), "fresh text");
        assert!(other.is_dir());
    }

    #[tokio::test]
    async fn unwritable_store_reports_write_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("not-a-dir");
        std::fs::write(&root, "file in the way").unwrap();
        let writer = MetadataWriter::new(Store::new(&root));

        let err = writer
            .publish(&item("test1", "/ft/test1.txt"), "text")
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "Write");
    }
}
