pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crawler::job::{Crawl, CrawlStatus, ExtractionResult};
use crate::extract::SelectorSchema;

// Re-export common types
pub use memory::{MemoryCrawlStore, MemoryResultStore, MemorySchemaStore};

/// External store of crawl definitions and their aggregate status
#[async_trait]
pub trait CrawlStore: Send + Sync {
    /// Register a crawl before its jobs are dispatched
    async fn insert(&self, crawl: Crawl) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Crawl>>;

    /// Persist the aggregate status, end time and error summary
    async fn set_status(
        &self,
        id: &str,
        status: CrawlStatus,
        ended_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<()>;
}

/// External store of per-site selector schemas, keyed by hostname
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn lookup(&self, hostname: &str) -> Result<Option<SelectorSchema>>;
}

/// External store of per-URL outcomes
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a terminal outcome; results are immutable once saved
    async fn save(&self, result: ExtractionResult) -> Result<()>;

    async fn find_by_crawl(&self, crawl_id: &str) -> Result<Vec<ExtractionResult>>;
}
