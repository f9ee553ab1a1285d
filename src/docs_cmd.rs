//! Document commands for the CLI: `kbchat ingest`, `kbchat seed`,
//! `kbchat reindex` and the `kbchat docs …` family.

use anyhow::{Context, Result};
use std::path::Path;

use kbchat_core::models::Document;

use crate::app::App;
use crate::documents::now;
use crate::stats::{format_age, format_bytes};

pub async fn run_ingest(app: &App, path: &Path) -> Result<()> {
    let report = app.ingest.ingest_path(path, &app.config.ingest).await?;

    for doc in &report.ingested {
        println!(
            "  ingested  {:<40} {:>4} chunks  {}",
            doc.filename, doc.chunk_count, doc.id
        );
    }
    for (path, error) in &report.failed {
        println!("  failed    {:<40} {}", path, error);
    }
    println!();
    println!(
        "{} ingested, {} failed",
        report.ingested.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() && report.ingested.is_empty() {
        anyhow::bail!("no files were ingested");
    }
    Ok(())
}

pub async fn run_seed(app: &App) -> Result<()> {
    let seeded = app.ingest.seed_samples().await?;
    if seeded.is_empty() {
        println!("Sample documents are already loaded.");
        return Ok(());
    }
    for doc in &seeded {
        println!("  {:<24} {}", doc.filename, doc.display_title());
    }
    println!("Loaded {} sample documents.", seeded.len());
    Ok(())
}

pub async fn run_reindex(app: &App) -> Result<()> {
    println!("Re-embedding every document with {}...", app.embedding_model());
    let report = app.ingest.reindex_all().await?;
    for (id, error) in &report.failed {
        println!("  failed  {}  {}", id, error);
    }
    println!(
        "{} reindexed, {} failed",
        report.reindexed.len(),
        report.failed.len()
    );
    Ok(())
}

pub async fn run_list(app: &App) -> Result<()> {
    let docs = app.registry.list().await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    let at = now();
    println!(
        "{:<36}  {:<10} {:>6} {:>9}  {:<14} {}",
        "ID", "STATUS", "CHUNKS", "SIZE", "UPLOADED", "TITLE"
    );
    for d in &docs {
        println!(
            "{:<36}  {:<10} {:>6} {:>9}  {:<14} {}",
            d.id,
            d.status.as_str(),
            d.chunk_count,
            format_bytes(d.size_bytes),
            format_age(d.upload_time, at),
            d.title
        );
    }
    println!();
    println!("{} documents", docs.len());
    Ok(())
}

pub async fn run_get(app: &App, id: &str, show_chunks: bool) -> Result<()> {
    let doc = app.registry.get(id).await?;
    print_document(&doc);

    if show_chunks {
        let chunks = app.registry.get_chunks(id).await?;
        println!();
        println!("--- Chunks ({}) ---", chunks.len());
        for chunk in &chunks {
            println!("[chunk {}] {}..{}", chunk.sequence_index, chunk.start, chunk.end);
            println!("{}", chunk.text);
            println!();
        }
    }
    Ok(())
}

fn print_document(doc: &Document) {
    let meta = &doc.derived_metadata;
    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("filename:     {}", doc.filename);
    println!("title:        {}", doc.display_title());
    if let Some(ref category) = meta.category {
        println!("category:     {}", category);
    }
    if !meta.topics.is_empty() {
        println!("topics:       {}", meta.topics.join(", "));
    }
    if let Some(ref summary) = meta.summary {
        println!("summary:      {}", summary);
    }
    println!("content_type: {}", doc.content_type);
    println!("size:         {}", format_bytes(doc.size_bytes));
    println!("uploaded:     {}", doc.upload_time.format("%Y-%m-%d %H:%M:%S"));
    println!("updated:      {}", doc.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("status:       {}", doc.status.as_str());
    println!("chunks:       {}", doc.chunk_count);
    println!("words:        {}", doc.word_count);
    if let Some(ref error) = doc.error {
        println!("error:        {}", error);
    }
}

pub async fn run_delete(app: &App, id: &str) -> Result<()> {
    app.registry.delete(id).await?;
    println!("Deleted {}", id);
    Ok(())
}

/// Write the raw file to `out`, or to its original filename in the current directory.
pub async fn run_download(app: &App, id: &str, out: Option<&Path>) -> Result<()> {
    let download = app.registry.download(id).await?;
    let target = match out {
        Some(p) => p.to_path_buf(),
        None => Path::new(&download.filename)
            .file_name()
            .map(|n| Path::new(".").join(n))
            .context("stored filename has no final component")?,
    };
    tokio::fs::write(&target, &download.bytes)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!(
        "Wrote {} ({}) to {}",
        download.filename,
        format_bytes(download.bytes.len() as u64),
        target.display()
    );
    Ok(())
}

pub async fn run_reingest(app: &App, id: &str) -> Result<()> {
    let doc = app.ingest.reingest(id).await?;
    println!(
        "Reingested {}: {} chunks, status {}",
        doc.filename,
        doc.chunk_count,
        doc.status.as_str()
    );
    Ok(())
}
