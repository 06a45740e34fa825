//! CLI command implementations.
//!
//! Each `run_*` function backs one `storelens` subcommand and prints
//! human-readable output to stdout. Logging goes to stderr.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::assistant::{AskRequest, AskStatus, Assistant};
use crate::compose::Composer;
use crate::config::Config;
use crate::crossref::{cross_reference_files, render_report};
use crate::extract::extract_file;
use crate::format::format_inr;
use crate::llm::LlmClient;
use crate::lookup::LookupService;
use crate::models::{ConfiguredPath, UploadedFile};
use crate::paths::PathIndex;

fn load_files(files: &[PathBuf]) -> Result<Vec<UploadedFile>> {
    files
        .iter()
        .map(|p| extract_file(p).with_context(|| format!("Failed to read {}", p.display())))
        .collect()
}

pub fn run_extract(files: &[PathBuf]) -> Result<()> {
    for file in load_files(files)? {
        println!(
            "== {} ({}, {} bytes, {} chars) ==",
            file.filename,
            file.kind.as_str(),
            file.size_bytes,
            file.char_count
        );
        if let Some(err) = &file.parse_error {
            eprintln!("warning: {}: {}", file.filename, err);
        }
        println!("{}", file.extracted_text);
    }
    Ok(())
}

pub fn run_crossref(files: &[PathBuf]) -> Result<()> {
    let uploads = load_files(files)?;
    let refs = cross_reference_files(&uploads);
    print!("{}", render_report(&refs));
    Ok(())
}

pub fn run_format_inr(amount: &str) -> Result<()> {
    let cleaned: String = amount
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | ' '))
        .collect();
    let value: f64 = cleaned
        .parse()
        .with_context(|| format!("Not a number: {}", amount))?;
    println!("{}", format_inr(value));
    Ok(())
}

fn print_path(p: &ConfiguredPath) {
    let scanned = p
        .last_scanned
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{:<36}  {:<20}  {:>6} files  {:>10} bytes  scanned {}",
        p.id, p.name, p.file_count, p.total_size, scanned
    );
    println!("    {}", p.location);
    if let Some(desc) = &p.description {
        println!("    {}", desc);
    }
}

pub async fn run_paths_list(config: &Config) -> Result<()> {
    let index = PathIndex::open(config).await?;
    let paths = index.list().await?;
    if paths.is_empty() {
        println!("No configured paths.");
    }
    for p in &paths {
        print_path(p);
    }
    index.close().await;
    Ok(())
}

pub async fn run_paths_add(
    config: &Config,
    name: &str,
    location: &str,
    description: Option<&str>,
) -> Result<()> {
    let index = PathIndex::open(config).await?;
    let record = index.add(name, location, description).await?;
    println!("Added path {}", record.id);
    print_path(&record);
    index.close().await;
    Ok(())
}

pub fn run_paths_validate(config: &Config, location: &str) -> Result<()> {
    let v = crate::paths::validate_location(location, &config.index);
    println!("location:  {}", v.location);
    println!("exists:    {}", v.exists);
    println!("readable:  {}", v.readable);
    println!("directory: {}", v.is_dir);
    if let Some(n) = v.file_count {
        println!("files:     {}", n);
    }
    println!("{}", v.message);
    if !v.is_valid() {
        bail!("{}", v.message);
    }
    Ok(())
}

pub async fn run_paths_update(
    config: &Config,
    id: &str,
    name: Option<&str>,
    location: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    let index = PathIndex::open(config).await?;
    let current = index.get(id).await?;
    let record = index
        .update(
            id,
            name.unwrap_or(&current.name),
            location.unwrap_or(&current.location),
            description.or(current.description.as_deref()),
        )
        .await?;
    println!("Updated path {}", record.id);
    print_path(&record);
    index.close().await;
    Ok(())
}

pub async fn run_paths_remove(config: &Config, id: &str) -> Result<()> {
    let index = PathIndex::open(config).await?;
    let record = index.remove(id).await?;
    println!("Removed path {} ({})", record.name, record.location);
    index.close().await;
    Ok(())
}

pub async fn run_paths_scan(config: &Config, id: &str) -> Result<()> {
    let index = PathIndex::open(config).await?;
    let record = index.scan(id).await?;
    println!("Scanned {}", record.name);
    print_path(&record);
    index.close().await;
    Ok(())
}

pub async fn run_paths_search(config: &Config, query: &str) -> Result<()> {
    let index = PathIndex::open(config).await?;
    let hits = index.search(query).await?;
    if hits.is_empty() {
        println!("No matches.");
    }
    for hit in &hits {
        match hit.line {
            Some(line) => println!("{}:{}:{}", hit.path_name, hit.file, line),
            None => println!("{}:{}", hit.path_name, hit.file),
        }
        for l in hit.context.lines() {
            println!("    {}", l);
        }
    }
    index.close().await;
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    files: &[PathBuf],
    use_paths: bool,
    json: bool,
) -> Result<()> {
    let uploads = load_files(files)?;
    let index = Arc::new(PathIndex::open(config).await?);
    let lookup = Arc::new(LookupService::new(&config.lookup)?);
    let composer = Composer::standard(&config.context, index.clone(), lookup);
    let assistant = Assistant::new(composer, LlmClient::from_config(&config.llm)?);

    let request = AskRequest {
        question: question.to_string(),
        uploads,
        use_paths,
    };
    let limit = Duration::from_secs(config.server.request_timeout_secs);
    let response = assistant.ask_within(&request, limit).await;
    index.close().await;
    let response = response?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.status == AskStatus::Unavailable {
        println!("Answer unavailable: {}", response.raw);
    } else {
        println!("{}", response.raw.trim_end());
    }

    if !response.sources.is_empty() {
        println!("\nSources:");
        for s in &response.sources {
            let note = if s.truncated { " (truncated)" } else { "" };
            println!("  [{}] {}{}", s.source.tag(), s.label, note);
        }
    }
    if !response.cross_references.is_empty() {
        println!("\nCross-references:");
        print!("{}", render_report(&response.cross_references));
    }
    Ok(())
}
