use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::browser::{FingerprintManager, PageFetcher, WebDriverFetcher};
use crate::cli::config::CrawlerConfig;
use crate::crawler::aggregator::CompletionAggregator;
use crate::crawler::events::{CrawlEvent, EventBus};
use crate::crawler::job::{Crawl, CrawlError, CrawlStatus};
use crate::crawler::limiter::RateLimiter;
use crate::crawler::queue::JobQueue;
use crate::crawler::worker::Worker;
use crate::egress::EgressManager;
use crate::extract::SelectorSchema;
use crate::storage::{
    CrawlStore, MemoryCrawlStore, MemoryResultStore, MemorySchemaStore, ResultStore, SchemaStore,
};

/// Wires the queue, workers, stores and event bus together and owns the
/// public orchestration surface: submit a crawl, cancel it, subscribe to
/// its events.
pub struct CrawlerController {
    config: CrawlerConfig,
    queue: Arc<JobQueue>,
    events: Arc<EventBus>,
    aggregator: Arc<CompletionAggregator>,
    crawl_store: Arc<dyn CrawlStore>,
    schema_store: Arc<dyn SchemaStore>,
    result_store: Arc<dyn ResultStore>,
    fetcher: Arc<dyn PageFetcher>,
    egress: Arc<Mutex<EgressManager>>,
    fingerprints: Arc<FingerprintManager>,
    workers: Vec<JoinHandle<()>>,
}

impl CrawlerController {
    /// Build a controller with in-memory stores and a WebDriver fetcher
    pub fn new(config: CrawlerConfig) -> Self {
        let fetcher = Arc::new(WebDriverFetcher::new(
            config.browser.clone(),
            Duration::from_secs(config.worker.navigation_timeout_secs),
        ));
        Self::with_parts(
            config,
            fetcher,
            Arc::new(MemoryCrawlStore::new()),
            Arc::new(MemorySchemaStore::new()),
            Arc::new(MemoryResultStore::new()),
        )
    }

    /// Build a controller from explicit parts; used when callers bring their
    /// own fetcher or stores
    pub fn with_parts(
        config: CrawlerConfig,
        fetcher: Arc<dyn PageFetcher>,
        crawl_store: Arc<dyn CrawlStore>,
        schema_store: Arc<dyn SchemaStore>,
        result_store: Arc<dyn ResultStore>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_dispatches,
            Duration::from_millis(config.rate_limit.window_ms),
        ));
        let queue = Arc::new(JobQueue::new(limiter));
        let events = Arc::new(EventBus::new());
        let aggregator = Arc::new(CompletionAggregator::new(
            crawl_store.clone(),
            result_store.clone(),
            events.clone(),
        ));
        let egress = Arc::new(Mutex::new(EgressManager::new(config.egress.clone())));
        let fingerprints = Arc::new(FingerprintManager::new(config.browser.fingerprints.clone()));

        Self {
            config,
            queue,
            events,
            aggregator,
            crawl_store,
            schema_store,
            result_store,
            fetcher,
            egress,
            fingerprints,
            workers: Vec::new(),
        }
    }

    /// Spawn the worker pool. Idempotent; calling twice is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Ok(());
        }

        if self.config.egress.enabled {
            let mut egress = self.egress.lock().await;
            if let Err(e) = egress.probe_all().await {
                warn!("Egress health probe failed: {}", e);
            }
        }

        info!("Starting {} workers", self.config.worker.worker_count);
        for id in 0..self.config.worker.worker_count {
            let worker = Worker {
                id,
                settings: self.config.worker.clone(),
                queue: self.queue.clone(),
                fetcher: self.fetcher.clone(),
                crawl_store: self.crawl_store.clone(),
                schema_store: self.schema_store.clone(),
                result_store: self.result_store.clone(),
                events: self.events.clone(),
                aggregator: self.aggregator.clone(),
                egress: self.egress.clone(),
                fingerprints: self.fingerprints.clone(),
            };
            self.workers.push(tokio::spawn(worker.run()));
        }
        Ok(())
    }

    /// Submit a crawl over a set of URLs.
    ///
    /// Validates every URL up front, records the crawl, registers it with the
    /// completion aggregator and only then enqueues jobs, so the first job
    /// cannot finish before the crawl is accounted for. Returns the crawl id.
    pub async fn start_crawl(
        &self,
        urls: Vec<String>,
        schema: Option<SelectorSchema>,
    ) -> Result<String, CrawlError> {
        Self::validate_urls(&urls)?;

        let crawl_id = Uuid::new_v4().to_string();
        let crawl = Crawl::new(&crawl_id, urls.clone(), schema);
        self.crawl_store
            .insert(crawl)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;
        self.crawl_store
            .set_status(&crawl_id, CrawlStatus::InProgress, None, None)
            .await
            .map_err(|e| CrawlError::Storage(e.to_string()))?;

        self.aggregator.crawl_started(&crawl_id, urls.len()).await;
        self.queue.enqueue_crawl(&crawl_id, &urls).await?;

        info!(crawl_id, urls = urls.len(), "Crawl submitted");
        Ok(crawl_id)
    }

    /// Stop dispatch for a crawl. In-flight jobs run to completion; the crawl
    /// finalizes once they drain.
    pub async fn cancel_crawl(&self, crawl_id: &str) -> Result<()> {
        let dropped = self.queue.cancel(crawl_id).await;
        info!(crawl_id, dropped, "Crawl cancelled");
        self.aggregator.jobs_cancelled(crawl_id, dropped).await?;
        Ok(())
    }

    /// Live event stream for one crawl
    pub async fn subscribe(&self, crawl_id: &str) -> broadcast::Receiver<CrawlEvent> {
        self.events.subscribe(crawl_id).await
    }

    pub async fn crawl(&self, crawl_id: &str) -> Result<Option<Crawl>> {
        self.crawl_store.get(crawl_id).await
    }

    pub async fn results(&self, crawl_id: &str) -> Result<Vec<crate::crawler::job::ExtractionResult>> {
        self.result_store.find_by_crawl(crawl_id).await
    }

    /// Close the queue and wait for workers to drain and exit
    pub async fn shutdown(&mut self) {
        self.queue.close().await;
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("Worker exited abnormally: {}", e);
            }
        }
        info!("All workers stopped");
    }

    fn validate_urls(urls: &[String]) -> Result<(), CrawlError> {
        if urls.is_empty() {
            return Err(CrawlError::InvalidUrl {
                url: String::new(),
                reason: "no URLs given".to_string(),
            });
        }
        for url in urls {
            let parsed = Url::parse(url).map_err(|e| CrawlError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(CrawlError::InvalidUrl {
                    url: url.clone(),
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::browser::{FetchError, FetchedPage};
    use crate::cli::config::{BrowserFingerprint, EgressEndpoint};

    struct StaticFetcher {
        html: String,
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _egress: Option<&EgressEndpoint>,
            _fingerprint: &BrowserFingerprint,
        ) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                http_status: Some(200),
                title: "Page".to_string(),
                body_text: "content ".repeat(20),
                html: self.html.clone(),
                ..Default::default()
            })
        }
    }

    fn controller() -> CrawlerController {
        let mut config = CrawlerConfig::default();
        config.worker.worker_count = 2;
        CrawlerController::with_parts(
            config,
            Arc::new(StaticFetcher {
                html: "<html><head><title>Page</title></head><body><h1>Hi</h1></body></html>"
                    .to_string(),
            }),
            Arc::new(MemoryCrawlStore::new()),
            Arc::new(MemorySchemaStore::new()),
            Arc::new(MemoryResultStore::new()),
        )
    }

    #[tokio::test]
    async fn test_start_crawl_rejects_invalid_urls() {
        let controller = controller();
        let err = controller
            .start_crawl(vec!["nope".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_start_crawl_rejects_empty_url_list() {
        let controller = controller();
        assert!(controller.start_crawl(vec![], None).await.is_err());
    }

    #[tokio::test]
    async fn test_crawl_runs_to_completion() {
        let mut controller = controller();

        // Subscribe before the workers start so no event can be missed
        let crawl_id = controller
            .start_crawl(
                vec![
                    "https://a.example/".to_string(),
                    "https://b.example/".to_string(),
                ],
                None,
            )
            .await
            .unwrap();
        let mut rx = controller.subscribe(&crawl_id).await;
        controller.start().await.unwrap();
        loop {
            match rx.recv().await {
                Ok(CrawlEvent::Finished { status, .. }) => {
                    assert_eq!(status, CrawlStatus::Completed);
                    break;
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream ended early: {}", e),
            }
        }

        let results = controller.results(&crawl_id).await.unwrap();
        assert_eq!(results.len(), 2);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_before_start_finalizes_crawl() {
        let controller = controller();
        // No workers running, so all jobs are still queued when we cancel
        let crawl_id = controller
            .start_crawl(vec!["https://a.example/".to_string()], None)
            .await
            .unwrap();

        let mut rx = controller.subscribe(&crawl_id).await;
        controller.cancel_crawl(&crawl_id).await.unwrap();

        match rx.recv().await.unwrap() {
            CrawlEvent::Finished { status, .. } => assert_eq!(status, CrawlStatus::Completed),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
