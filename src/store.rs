//! The canonical on-disk store.
//!
//! Every bibcode owns one directory whose location is the pairtree encoding
//! of the bibcode split into two-character levels under the store root,
//! closed by a fixed `obj` leaf:
//!
//! ```text
//! 2015MNRAS.447.1618S  →  <root>/20/15/MN/RA/S,/44/7,/16/18/S/obj/
//!                              ├── meta.json      (provenance descriptor)
//!                              └── fulltext.txt   (text artifact)
//! ```
//!
//! Pair levels are at most two characters long, so the three-character leaf
//! never collides with the levels of a longer bibcode and a bibcode
//! directory never contains another bibcode's directory.
//!
//! The encoding escapes bytes outside printable ASCII and `" * + , < = > ? \ ^ |`
//! as `^xx`, then maps `/` to `=`, `:` to `+` and `.` to `,`. It is pure,
//! stable across runs and injective, so no two bibcodes share a directory.
//!
//! The change detector only reads from the store and the metadata writer
//! only writes to it.

use anyhow::Result;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::ProvenanceRecord;

pub const META_FILE: &str = "meta.json";
pub const TEXT_FILE: &str = "fulltext.txt";
pub const OBJECT_DIR: &str = "obj";

/// Marker inside the names of in-flight writer directories.
pub(crate) const STAGING_MARKER: &str = ".staging-";
pub(crate) const RETIRED_MARKER: &str = ".retired-";

/// Pairtree-encode a bibcode.
pub fn pairtree_encode(bibcode: &str) -> String {
    let mut escaped = String::with_capacity(bibcode.len());
    for byte in bibcode.bytes() {
        let needs_hex = !(0x21..=0x7e).contains(&byte)
            || matches!(
                byte,
                b'"' | b'*' | b'+' | b',' | b'<' | b'=' | b'>' | b'?' | b'\\' | b'^' | b'|'
            );
        if needs_hex {
            escaped.push_str(&format!("^{:02x}", byte));
        } else {
            escaped.push(byte as char);
        }
    }
    escaped
        .chars()
        .map(|c| match c {
            '/' => '=',
            ':' => '+',
            '.' => ',',
            other => other,
        })
        .collect()
}

/// Relative directory for a bibcode: the encoded id in two-character levels
/// followed by the object leaf.
pub fn partition(bibcode: &str) -> PathBuf {
    let encoded: Vec<char> = pairtree_encode(bibcode).chars().collect();
    let mut path: PathBuf = encoded
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect();
    path.push(OBJECT_DIR);
    path
}

/// Outcome of looking up stored provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Missing,
    Found(ProvenanceRecord),
    /// A descriptor exists but does not parse.
    Corrupt(String),
}

/// Handle on the store root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bibcode_dir(&self, bibcode: &str) -> PathBuf {
        self.root.join(partition(bibcode))
    }

    pub fn meta_path(&self, bibcode: &str) -> PathBuf {
        self.bibcode_dir(bibcode).join(META_FILE)
    }

    pub fn text_path(&self, bibcode: &str) -> PathBuf {
        self.bibcode_dir(bibcode).join(TEXT_FILE)
    }

    /// Read the provenance descriptor for `bibcode`. Read-only.
    pub async fn lookup(&self, bibcode: &str) -> std::io::Result<Lookup> {
        let path = self.meta_path(bibcode);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Lookup::Missing),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice::<ProvenanceRecord>(&bytes) {
            Ok(record) => Ok(Lookup::Found(record)),
            Err(e) => Ok(Lookup::Corrupt(e.to_string())),
        }
    }

    /// Scan the whole store and report on pairing and leftovers.
    pub fn audit(&self) -> Result<StoreAudit> {
        let mut audit = StoreAudit::default();
        if !self.root.exists() {
            return Ok(audit);
        }

        let mut walker = WalkDir::new(&self.root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry?;
            if entry.file_type().is_file() {
                audit.total_bytes += entry.metadata()?.len();
                continue;
            }
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.contains(STAGING_MARKER) || name.contains(RETIRED_MARKER) {
                audit.leftovers.push(entry.path().to_path_buf());
                walker.skip_current_dir();
                continue;
            }

            let has_meta = entry.path().join(META_FILE).is_file();
            let has_text = entry.path().join(TEXT_FILE).is_file();
            match (has_meta, has_text) {
                (true, true) => audit.complete += 1,
                (false, false) => {}
                _ => audit.incomplete.push(entry.path().to_path_buf()),
            }
        }

        audit.leftovers.sort();
        audit.incomplete.sort();
        Ok(audit)
    }

    /// Clean up after an interrupted publication, across the whole store.
    ///
    /// Staging directories are deleted. A retired directory is renamed back
    /// when its live directory is missing, otherwise deleted. Only safe while
    /// no writer is running.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for leftover in self.audit()?.leftovers {
            report.record(recover(&leftover)?);
        }
        Ok(report)
    }
}

/// Recover the leftovers of the single bibcode directory `dir`.
///
/// Used by the writer that owns `dir` before it publishes, so it never
/// touches another bibcode's in-flight directories.
pub(crate) fn recover_leftovers(dir: &Path) -> std::io::Result<SweepReport> {
    let mut report = SweepReport::default();
    let (Some(parent), Some(leaf)) = (dir.parent(), dir.file_name()) else {
        return Ok(report);
    };
    let leaf = leaf.to_string_lossy();
    let staging = format!(".{}{}", leaf, STAGING_MARKER);
    let retired = format!(".{}{}", leaf, RETIRED_MARKER);

    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };
    let mut leftovers = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&staging) || name.starts_with(&retired) {
            leftovers.push(entry.path());
        }
    }
    leftovers.sort();
    for leftover in leftovers {
        report.record(recover(&leftover)?);
    }
    Ok(report)
}

/// Delete a staging directory or put a retired one back. Returns whether
/// it was restored.
fn recover(leftover: &Path) -> std::io::Result<bool> {
    let name = leftover
        .file_name()
        .map(OsStr::to_string_lossy)
        .unwrap_or_default()
        .to_string();

    if let Some(live_name) = live_name_for(&name, RETIRED_MARKER) {
        let live = leftover.with_file_name(live_name);
        if !live.exists() {
            std::fs::rename(leftover, &live)?;
            tracing::warn!(path = %live.display(), "restored retired directory");
            return Ok(true);
        }
    }
    std::fs::remove_dir_all(leftover)?;
    tracing::debug!(path = %leftover.display(), "removed leftover directory");
    Ok(false)
}

/// `.obj.retired-<uuid>` → `obj`.
fn live_name_for(name: &str, marker: &str) -> Option<String> {
    let rest = name.strip_prefix('.')?;
    let idx = rest.rfind(marker)?;
    Some(rest[..idx].to_string())
}

#[derive(Debug, Default)]
pub struct StoreAudit {
    /// Directories holding both `meta.json` and `fulltext.txt`.
    pub complete: u64,
    /// Directories holding only one of the two artifacts.
    pub incomplete: Vec<PathBuf>,
    /// Staging or retired directories left behind by an interrupted write.
    pub leftovers: Vec<PathBuf>,
    pub total_bytes: u64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: u64,
    pub restored: u64,
}

impl SweepReport {
    fn record(&mut self, restored: bool) {
        if restored {
            self.restored += 1;
        } else {
            self.removed += 1;
        }
    }
}
