use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cli::config::CrawlerConfig;
use crate::crawler::controller::CrawlerController;
use crate::crawler::events::{CrawlEvent, JobStage};
use crate::crawler::job::{Crawl, CrawlStatus, ExtractionResult};
use crate::extract::SelectorSchema;

/// On-disk record of a finished crawl, written by `crawl` and read by `status`
#[derive(Serialize, Deserialize)]
struct CrawlRecord {
    crawl: Crawl,
    results: Vec<ExtractionResult>,
}

fn records_dir() -> PathBuf {
    let mut path = if let Some(proj_dirs) =
        directories::ProjectDirs::from("com", "selector-crawler", "selector-crawler")
    {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from("./data")
    };
    path.push("crawls");
    path
}

/// Run a crawl to completion, streaming per-job events as they happen
pub async fn crawl(
    mut urls: Vec<String>,
    url_file: Option<PathBuf>,
    schema_file: Option<PathBuf>,
    profile: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(path) = url_file {
        let contents = fs::read_to_string(&path)
            .context(format!("Failed to read URL file: {}", path.display()))?;
        urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if urls.is_empty() {
        bail!("No URLs to crawl");
    }

    let schema = match schema_file {
        Some(path) => Some(load_schema(&path)?),
        None => None,
    };

    let config = match profile {
        Some(profile) => CrawlerConfig::load_profile(&profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => CrawlerConfig::load_default()?,
    };

    let mut controller = CrawlerController::new(config);

    // Enqueue before the workers start so the subscription below cannot miss
    // the terminal event
    let crawl_id = controller.start_crawl(urls, schema).await?;
    let mut rx = controller.subscribe(&crawl_id).await;
    controller.start().await?;
    info!("Crawl started with ID: {}", crawl_id);

    match watch_until_finished(&mut rx).await {
        Some(status) => println!("Crawl {} finished: {}", crawl_id, status),
        None => warn!("Event stream closed before the crawl finished"),
    }

    let crawl = controller
        .crawl(&crawl_id)
        .await?
        .context("Crawl record missing after completion")?;
    let results = controller.results(&crawl_id).await?;
    controller.shutdown().await;

    let record = CrawlRecord { crawl, results };
    save_record(&crawl_id, &record)?;

    let json = serde_json::to_string_pretty(&record.results)?;
    match output {
        Some(path) => {
            fs::write(&path, json)
                .context(format!("Failed to write results to: {}", path.display()))?;
            info!("Results written to: {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Stream job events to the terminal until the crawl's terminal event.
///
/// A lagging receiver loses intermediate progress lines, not the watch: the
/// loop resubscribes at the current position and keeps waiting. Only a
/// closed channel ends the watch without a status.
async fn watch_until_finished(
    rx: &mut broadcast::Receiver<CrawlEvent>,
) -> Option<CrawlStatus> {
    loop {
        match rx.recv().await {
            Ok(CrawlEvent::Job(event)) => {
                let stage = match event.stage {
                    JobStage::Started => "started",
                    JobStage::Saving => "saving",
                    JobStage::Success => "success",
                    JobStage::Failed => "failed",
                };
                match event.error {
                    Some(error) => println!("[{}] {} ({})", stage, event.url, error),
                    None => println!("[{}] {}", stage, event.url),
                }
            }
            Ok(CrawlEvent::Finished { status, .. }) => return Some(status),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event watcher fell behind; progress lines lost");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn save_record(crawl_id: &str, record: &CrawlRecord) -> Result<()> {
    let dir = records_dir();
    fs::create_dir_all(&dir)
        .context(format!("Failed to create data directory: {}", dir.display()))?;
    let path = dir.join(format!("{}.json", crawl_id));
    fs::write(&path, serde_json::to_string_pretty(record)?)
        .context(format!("Failed to write crawl record: {}", path.display()))?;
    Ok(())
}

/// Show the recorded outcome of a finished crawl
pub async fn status(crawl_id: String) -> Result<()> {
    let path = records_dir().join(format!("{}.json", crawl_id));
    if !path.exists() {
        bail!("No record found for crawl '{}'", crawl_id);
    }

    let contents = fs::read_to_string(&path)
        .context(format!("Failed to read crawl record: {}", path.display()))?;
    let record: CrawlRecord = serde_json::from_str(&contents)
        .context(format!("Failed to parse crawl record: {}", path.display()))?;

    let succeeded = record
        .results
        .iter()
        .filter(|r| r.error.is_none())
        .count();

    println!("Crawl ID: {}", record.crawl.id);
    println!("Status: {}", record.crawl.status);
    println!("URLs: {}", record.crawl.urls.len());
    println!("Succeeded: {}/{}", succeeded, record.results.len());
    if let Some(started) = record.crawl.started_at {
        println!("Started: {}", started);
    }
    if let Some(ended) = record.crawl.ended_at {
        println!("Ended: {}", ended);
    }
    if let Some(error) = &record.crawl.error {
        println!("Error: {}", error);
    }
    for result in record.results.iter().filter(|r| r.error.is_some()) {
        if let (Some(error), Some(category)) = (&result.error, result.error_category) {
            println!("  - {} [{}]: {}", result.url, category, error);
        }
    }

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    match CrawlerConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = CrawlerConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}

/// Check a selector schema file without running a crawl
pub async fn validate_schema(file: PathBuf) -> Result<()> {
    let schema = load_schema(&file)?;
    println!(
        "Schema OK: {} top-level field(s) in {}",
        schema.fields.len(),
        file.display()
    );
    Ok(())
}

fn load_schema(path: &Path) -> Result<SelectorSchema> {
    let contents = fs::read_to_string(path)
        .context(format!("Failed to read schema file: {}", path.display()))?;
    SelectorSchema::from_yaml(&contents)
        .context(format!("Invalid schema: {}", path.display()))
}
