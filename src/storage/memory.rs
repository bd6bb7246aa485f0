use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::crawler::job::{Crawl, CrawlStatus, ExtractionResult};
use crate::extract::SelectorSchema;
use crate::storage::{CrawlStore, ResultStore, SchemaStore};

/// In-memory crawl store, the default backend for tests and single-process
/// runs. Durable backends are collaborator-provided implementations of the
/// same trait.
#[derive(Default)]
pub struct MemoryCrawlStore {
    crawls: Mutex<HashMap<String, Crawl>>,
}

impl MemoryCrawlStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrawlStore for MemoryCrawlStore {
    async fn insert(&self, crawl: Crawl) -> Result<()> {
        self.crawls.lock().await.insert(crawl.id.clone(), crawl);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Crawl>> {
        Ok(self.crawls.lock().await.get(id).cloned())
    }

    async fn set_status(
        &self,
        id: &str,
        status: CrawlStatus,
        ended_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<()> {
        let mut crawls = self.crawls.lock().await;
        let crawl = crawls
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("Unknown crawl: {}", id))?;

        crawl.status = status;
        if crawl.started_at.is_none() && status == CrawlStatus::InProgress {
            crawl.started_at = Some(Utc::now());
        }
        if ended_at.is_some() {
            crawl.ended_at = ended_at;
        }
        if error.is_some() {
            crawl.error = error;
        }

        debug!(crawl_id = id, %status, "Updated crawl status");
        Ok(())
    }
}

/// In-memory hostname-to-schema mapping
#[derive(Default)]
pub struct MemorySchemaStore {
    schemas: Mutex<HashMap<String, SelectorSchema>>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, hostname: &str, schema: SelectorSchema) {
        self.schemas
            .lock()
            .await
            .insert(hostname.to_lowercase(), schema);
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn lookup(&self, hostname: &str) -> Result<Option<SelectorSchema>> {
        Ok(self.schemas.lock().await.get(&hostname.to_lowercase()).cloned())
    }
}

/// In-memory result store keyed by crawl id
#[derive(Default)]
pub struct MemoryResultStore {
    results: Mutex<HashMap<String, Vec<ExtractionResult>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, result: ExtractionResult) -> Result<()> {
        self.results
            .lock()
            .await
            .entry(result.crawl_id.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    async fn find_by_crawl(&self, crawl_id: &str) -> Result<Vec<ExtractionResult>> {
        Ok(self
            .results
            .lock()
            .await
            .get(crawl_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Value;

    #[tokio::test]
    async fn test_crawl_status_updates() {
        let store = MemoryCrawlStore::new();
        store
            .insert(Crawl::new("c1", vec!["https://a.example/".to_string()], None))
            .await
            .unwrap();

        store
            .set_status("c1", CrawlStatus::InProgress, None, None)
            .await
            .unwrap();
        let crawl = store.get("c1").await.unwrap().unwrap();
        assert_eq!(crawl.status, CrawlStatus::InProgress);
        assert!(crawl.started_at.is_some());
        assert!(crawl.ended_at.is_none());

        store
            .set_status("c1", CrawlStatus::Failed, Some(Utc::now()), Some("1 job failed".into()))
            .await
            .unwrap();
        let crawl = store.get("c1").await.unwrap().unwrap();
        assert_eq!(crawl.status, CrawlStatus::Failed);
        assert!(crawl.ended_at.is_some());
        assert_eq!(crawl.error.as_deref(), Some("1 job failed"));
    }

    #[tokio::test]
    async fn test_set_status_on_unknown_crawl_fails() {
        let store = MemoryCrawlStore::new();
        assert!(store
            .set_status("nope", CrawlStatus::Completed, None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_schema_lookup_is_case_insensitive() {
        let store = MemorySchemaStore::new();
        store.register("Shop.Example", SelectorSchema::default()).await;
        assert!(store.lookup("shop.example").await.unwrap().is_some());
        assert!(store.lookup("other.example").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_results_grouped_by_crawl() {
        let store = MemoryResultStore::new();
        store
            .save(ExtractionResult::success("c1", "https://a.example/", Value::Null))
            .await
            .unwrap();
        store
            .save(ExtractionResult::success("c2", "https://b.example/", Value::Null))
            .await
            .unwrap();

        assert_eq!(store.find_by_crawl("c1").await.unwrap().len(), 1);
        assert_eq!(store.find_by_crawl("c2").await.unwrap().len(), 1);
        assert!(store.find_by_crawl("c3").await.unwrap().is_empty());
    }
}
