use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorCategory;
use crate::extract::{SelectorSchema, Value};

/// A named request to fetch and extract a set of URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crawl {
    /// Unique identifier for this crawl
    pub id: String,

    /// Ordered target URLs
    pub urls: Vec<String>,

    /// Selector schema; when absent, the schema store and then the built-in
    /// default are used per URL
    pub schema: Option<SelectorSchema>,

    /// Aggregate status across all jobs
    pub status: CrawlStatus,

    /// When the crawl was dispatched
    pub started_at: Option<DateTime<Utc>>,

    /// When the final status was computed
    pub ended_at: Option<DateTime<Utc>>,

    /// Crawl-level error summary, set when the crawl fails
    pub error: Option<String>,
}

impl Crawl {
    pub fn new(id: impl Into<String>, urls: Vec<String>, schema: Option<SelectorSchema>) -> Self {
        Self {
            id: id.into(),
            urls,
            schema,
            status: CrawlStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::InProgress => "in-progress",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The unit of work for a single URL within a crawl.
///
/// Ephemeral: lives only in the queue and the worker; its outcome is what
/// gets persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    /// Identifier assigned at enqueue time
    pub job_id: String,

    /// Crawl this job belongs to
    pub crawl_id: String,

    /// URL to fetch
    pub url: String,
}

/// Per-URL outcome of a crawl job, immutable once saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub url: String,
    pub crawl_id: String,
    pub status: ResultStatus,
    pub data: Value,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub created_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn success(crawl_id: &str, url: &str, data: Value) -> Self {
        Self {
            url: url.to_string(),
            crawl_id: crawl_id.to_string(),
            status: ResultStatus::Success,
            data,
            error: None,
            error_category: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        crawl_id: &str,
        url: &str,
        data: Value,
        error: String,
        category: ErrorCategory,
    ) -> Self {
        Self {
            url: url.to_string(),
            crawl_id: crawl_id.to_string(),
            status: ResultStatus::Failed,
            data,
            error: Some(error),
            error_category: Some(category),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Errors surfaced by the orchestration layer.
///
/// Page-level failures never appear here; they are recorded on the
/// ExtractionResult instead.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("browser infrastructure unavailable: {0}")]
    Infrastructure(String),

    #[error("storage failure: {0}")]
    Storage(String),
}
