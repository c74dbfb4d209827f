//! Provenance lookup by bibcode.
//!
//! Resolves the bibcode directory and reads what the store currently holds
//! for it. Used by `ftx show`.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::Config;
use crate::models::ProvenanceRecord;
use crate::store::{Lookup, Store};

#[derive(Debug, Clone, Serialize)]
pub struct ShowResponse {
    pub bibcode: String,
    pub directory: PathBuf,
    pub provenance: ProvenanceRecord,
    pub text_bytes: u64,
}

pub async fn show_bibcode(config: &Config, bibcode: &str) -> Result<ShowResponse> {
    let store = Store::new(&config.store.root);
    let provenance = match store.lookup(bibcode).await? {
        Lookup::Found(record) => record,
        Lookup::Missing => bail!("no provenance recorded for {}", bibcode),
        Lookup::Corrupt(reason) => bail!(
            "provenance for {} is unreadable: {}",
            bibcode,
            reason
        ),
    };
    let text_bytes = tokio::fs::metadata(store.text_path(bibcode))
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(ShowResponse {
        bibcode: bibcode.to_string(),
        directory: store.bibcode_dir(bibcode),
        provenance,
        text_bytes,
    })
}

pub async fn run_show(config: &Config, bibcode: &str, json: bool) -> Result<()> {
    let resp = show_bibcode(config, bibcode).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    println!("--- bibcode ---");
    println!("bibcode: {}", resp.bibcode);
    println!("directory: {}", resp.directory.display());
    println!("provider: {}", resp.provenance.provider);
    println!("ft_source: {}", resp.provenance.ft_source);
    println!("index_date: {}", resp.provenance.index_date);
    println!("text bytes: {}", resp.text_bytes);
    Ok(())
}
