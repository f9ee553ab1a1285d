//! Knowledge-base statistics and repair reports for the CLI.
//!
//! `kbchat stats` prints document, chunk and byte totals, the embedding
//! model the vector store was built with, and a per-status breakdown.
//! `kbchat reconcile` prints what a reconciliation pass repaired.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::app::App;
use crate::registry::ReconcileReport;

pub async fn run_stats(app: &App) -> Result<()> {
    let stats = app.registry.stats().await?;
    let db_size = std::fs::metadata(&app.config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("kbchat — Knowledge Base Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", app.config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!("  Raw files:   {}", format_bytes(stats.total_bytes));
    match (&stats.embedding_model, stats.dims) {
        (Some(model), Some(dims)) => println!("  Embeddings:  {} ({} dims)", model, dims),
        _ => println!("  Embeddings:  none stored yet"),
    }
    if stats.embedding_model.as_deref().is_some_and(|m| m != app.embedding_model()) {
        println!(
            "  Warning:     configured model is {}; run `kbchat reindex`",
            app.embedding_model()
        );
    }

    if !stats.by_status.is_empty() {
        println!();
        println!("  By status:");
        println!("  {:<12} {:>6}", "STATUS", "DOCS");
        println!("  {}", "-".repeat(19));
        for (status, count) in &stats.by_status {
            println!("  {:<12} {:>6}", status, count);
        }
    }
    println!();
    Ok(())
}

pub async fn run_reconcile(app: &App) -> Result<()> {
    let report = app.registry.reconcile().await?;
    print_reconcile(&report);
    Ok(())
}

fn print_reconcile(report: &ReconcileReport) {
    if report.is_clean() {
        println!("Nothing to repair.");
        return;
    }
    let sections = [
        ("Finished deletes", &report.finished_deletes),
        ("Interrupted ingests marked error", &report.interrupted_ingests),
        ("Orphan chunks removed for", &report.orphan_chunk_documents),
        ("Orphan files removed", &report.orphan_blobs),
    ];
    for (label, items) in sections {
        if items.is_empty() {
            continue;
        }
        println!("{} ({}):", label, items.len());
        for item in items {
            println!("  {}", item);
        }
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
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

/// "just now", "5 mins ago", "3 days ago", or a date for anything older than a month.
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds().max(0);
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "just now");
        assert_eq!(format_age(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_age(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_age(now - Duration::days(2), now), "2 days ago");
        let old = now - Duration::days(90);
        assert_eq!(format_age(old, now), old.format("%Y-%m-%d %H:%M").to_string());
    }
}
