//! Store statistics and health overview.
//!
//! Walks the canonical store and reports how many bibcode directories hold a
//! complete pair, which ones are incomplete, and whether interrupted writes
//! left anything behind. Used by `ftx stats`.

use anyhow::Result;

use crate::config::Config;
use crate::store::Store;

/// Run the stats command: audit the store and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let store = Store::new(&config.store.root);
    let audit = store.audit()?;

    println!("Full-text store stats");
    println!("=====================");
    println!();
    println!("  Root:        {}", store.root().display());
    println!("  Size:        {}", format_bytes(audit.total_bytes));
    println!();
    println!("  Complete:    {}", audit.complete);
    println!("  Incomplete:  {}", audit.incomplete.len());
    println!("  Leftovers:   {}", audit.leftovers.len());

    if !audit.incomplete.is_empty() {
        println!();
        println!("  Incomplete directories:");
        for path in &audit.incomplete {
            println!("    {}", path.display());
        }
    }
    if !audit.leftovers.is_empty() {
        println!();
        println!("  Interrupted writes (run `ftx sweep`):");
        for path in &audit.leftovers {
            println!("    {}", path.display());
        }
    }
    println!();
    Ok(())
}

/// Remove staging leftovers and restore retired pairs.
pub fn run_sweep(config: &Config) -> Result<()> {
    let report = Store::new(&config.store.root).sweep()?;
    println!("sweep");
    println!("  removed: {}", report.removed);
    println!("  restored: {}", report.restored);
    println!("ok");
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
