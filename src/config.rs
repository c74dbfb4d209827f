use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub formats: FormatsConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_standard_workers")]
    pub standard_workers: usize,
    #[serde(default = "default_pdf_workers")]
    pub pdf_workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            standard_workers: default_standard_workers(),
            pdf_workers: default_pdf_workers(),
        }
    }
}

impl ExtractionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    250
}
fn default_standard_workers() -> usize {
    8
}
fn default_pdf_workers() -> usize {
    2
}

/// Format to extraction-family table.
#[derive(Debug, Deserialize, Clone)]
pub struct FormatsConfig {
    #[serde(default = "default_standard_formats")]
    pub standard: Vec<String>,
    #[serde(default = "default_pdf_formats")]
    pub pdf: Vec<String>,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            standard: default_standard_formats(),
            pdf: default_pdf_formats(),
        }
    }
}

fn default_standard_formats() -> Vec<String> {
    [
        "txt", "text", "ocr", "xml", "teixml", "elsevier", "html", "htm", "tex",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_pdf_formats() -> Vec<String> {
    vec!["pdf".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct WriterConfig {
    #[serde(default = "default_writer_instances")]
    pub instances: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            instances: default_writer_instances(),
        }
    }
}

fn default_writer_instances() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Fully defaulted config rooted at `store_root`.
    pub fn minimal(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                root: store_root.into(),
            },
            queues: QueueConfig::default(),
            extraction: ExtractionConfig::default(),
            formats: FormatsConfig::default(),
            writer: WriterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Lowercase the format table and check every invariant.
    pub fn validate(mut self) -> Result<Self> {
        if self.queues.capacity == 0 {
            bail!("queues.capacity must be > 0");
        }
        if self.extraction.max_attempts == 0 {
            bail!("extraction.max_attempts must be >= 1");
        }
        if self.extraction.standard_workers == 0 || self.extraction.pdf_workers == 0 {
            bail!("extraction.standard_workers and extraction.pdf_workers must be >= 1");
        }
        if self.writer.instances == 0 {
            bail!("writer.instances must be >= 1");
        }

        self.formats.standard = normalize_formats(&self.formats.standard);
        self.formats.pdf = normalize_formats(&self.formats.pdf);
        if self.formats.standard.is_empty() || self.formats.pdf.is_empty() {
            bail!("formats.standard and formats.pdf must each list at least one format");
        }
        let standard: HashSet<&String> = self.formats.standard.iter().collect();
        if let Some(dup) = self.formats.pdf.iter().find(|f| standard.contains(f)) {
            bail!(
                "format '{}' is listed under both formats.standard and formats.pdf",
                dup
            );
        }

        Ok(self)
    }
}

fn normalize_formats(formats: &[String]) -> Vec<String> {
    let mut out: Vec<String> = formats
        .iter()
        .map(|f| f.trim().trim_start_matches('.').to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_is_valid() {
        let cfg = Config::minimal("/tmp/store").validate().unwrap();
        assert_eq!(cfg.extraction.max_attempts, 3);
        assert!(cfg.formats.standard.contains(&"xml".to_string()));
        assert_eq!(cfg.formats.pdf, vec!["pdf".to_string()]);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[store]
root = "/data/fulltext"

[extraction]
pdf_workers = 1

[formats]
pdf = [".PDF"]
"#,
        )
        .unwrap();
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.extraction.pdf_workers, 1);
        assert_eq!(cfg.extraction.standard_workers, 8);
        assert_eq!(cfg.formats.pdf, vec!["pdf".to_string()]);
        assert_eq!(cfg.writer.instances, 1);
    }

    #[test]
    fn overlapping_families_are_rejected() {
        let mut cfg = Config::minimal("/tmp/store");
        cfg.formats.pdf.push("XML".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut cfg = Config::minimal("/tmp/store");
        cfg.extraction.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
