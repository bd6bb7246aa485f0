use std::sync::Arc;

use scraper::Html;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{FetchError, FingerprintManager, PageFetcher};
use crate::classify::{classify, content_signal, ErrorAnalysis, ErrorCategory, FailureSignals};
use crate::cli::config::WorkerSettings;
use crate::crawler::aggregator::CompletionAggregator;
use crate::crawler::events::{CrawlEvent, EventBus, JobEvent, JobStage};
use crate::crawler::job::{CrawlError, CrawlJob, ExtractionResult};
use crate::crawler::queue::JobQueue;
use crate::egress::EgressManager;
use crate::extract::{extract, extract_default, SelectorSchema, Value};
use crate::storage::{CrawlStore, ResultStore, SchemaStore};

/// One worker task: pulls jobs off the queue and runs each through the
/// fetch-extract-classify loop.
///
/// Per job the state machine is Started -> Extracting -> Saving ->
/// Succeeded/Failed; Failed is terminal only after the internal
/// egress-rotating retry loop is exhausted. Nothing a job does escapes
/// `process_job` as an error: every failure mode becomes a structured
/// ExtractionResult.
pub struct Worker {
    pub(crate) id: usize,
    pub(crate) settings: WorkerSettings,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) crawl_store: Arc<dyn CrawlStore>,
    pub(crate) schema_store: Arc<dyn SchemaStore>,
    pub(crate) result_store: Arc<dyn ResultStore>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) aggregator: Arc<CompletionAggregator>,
    pub(crate) egress: Arc<Mutex<EgressManager>>,
    pub(crate) fingerprints: Arc<FingerprintManager>,
}

impl Worker {
    /// Drain the queue until it closes
    pub async fn run(self) {
        info!(worker = self.id, "Worker started");
        while let Some(job) = self.queue.pop().await {
            debug!(worker = self.id, url = %job.url, "Processing job");
            self.process_job(job).await;
        }
        info!(worker = self.id, "Worker stopped");
    }

    /// Run one job to a terminal outcome and report it everywhere it needs
    /// to go
    pub async fn process_job(&self, job: CrawlJob) {
        self.publish_stage(&job, JobStage::Started, None, None).await;

        let result = self.run_attempts(&job).await;

        self.publish_stage(&job, JobStage::Saving, None, None).await;

        if let Err(e) = self.result_store.save(result.clone()).await {
            // Storage failures still produce a terminal event; the outcome
            // itself is already decided
            error!(worker = self.id, url = %job.url, "Failed to persist result: {}", e);
        }

        let stage = match result.error {
            None => JobStage::Success,
            Some(_) => JobStage::Failed,
        };
        let error = result.error.clone();
        self.publish_stage(&job, stage, Some(result), error).await;

        if let Err(e) = self.aggregator.job_finished(&job.crawl_id).await {
            error!(worker = self.id, crawl_id = %job.crawl_id, "Aggregator update failed: {}", e);
        }
    }

    async fn publish_stage(
        &self,
        job: &CrawlJob,
        stage: JobStage,
        result: Option<ExtractionResult>,
        error: Option<String>,
    ) {
        self.events
            .publish(
                &job.crawl_id,
                CrawlEvent::Job(JobEvent {
                    job_id: job.job_id.clone(),
                    url: job.url.clone(),
                    stage,
                    result,
                    error,
                }),
            )
            .await;
    }

    /// The internal retry loop: fetch, extract, classify, and either accept
    /// the outcome or rotate egress and go again
    async fn run_attempts(&self, job: &CrawlJob) -> ExtractionResult {
        let schema = self.resolve_schema(job).await;

        let mut fingerprint = match self.fingerprints.random_fingerprint() {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                let err = CrawlError::Infrastructure(e.to_string());
                error!(worker = self.id, "{}", err);
                return ExtractionResult::failed(
                    &job.crawl_id,
                    &job.url,
                    Value::Null,
                    err.to_string(),
                    ErrorCategory::Unknown,
                );
            }
        };

        let mut last_analysis: Option<ErrorAnalysis> = None;
        let mut last_infra_error: Option<String> = None;

        for attempt in 1..=self.settings.max_attempts {
            let egress = {
                let mut manager = self.egress.lock().await;
                manager.current().unwrap_or_default()
            };

            let fetched = self.fetcher.fetch(&job.url, egress.as_ref(), &fingerprint).await;

            let (data, analysis) = match fetched {
                Err(FetchError::Session(msg)) => {
                    // Infrastructure problem, not a page failure; retry
                    // without blaming the egress point
                    let err = CrawlError::Infrastructure(msg);
                    warn!(worker = self.id, attempt, "{}", err);
                    last_infra_error = Some(err.to_string());
                    continue;
                }
                Err(e) => {
                    let signals = FailureSignals {
                        error: Some(e.to_string()),
                        ..Default::default()
                    };
                    (Value::Null, Some(classify(&signals)))
                }
                Ok(page) => {
                    // Html is only held inside this block; it must not live
                    // across an await point
                    let data = {
                        let document = Html::parse_document(&page.html);
                        match &schema {
                            Some(schema) => extract(&document, schema),
                            None => extract_default(&document),
                        }
                    };

                    let http_error = page.http_status.map_or(false, |s| s >= 400);
                    let soft_failure =
                        content_signal(&page.title, &page.body_text).is_some();

                    let analysis = if http_error || soft_failure || !page.script_errors.is_empty()
                    {
                        let signals = FailureSignals {
                            error: None,
                            http_status: page.http_status,
                            script_errors: page.script_errors,
                            failed_requests: page.failed_requests,
                            title: page.title,
                            body_text: page.body_text,
                        };
                        Some(classify(&signals))
                    } else {
                        None
                    };

                    (data, analysis)
                }
            };

            let analysis = match analysis {
                None => {
                    return ExtractionResult::success(&job.crawl_id, &job.url, data);
                }
                Some(analysis) if !analysis.is_blocking => {
                    // Non-blocking failure: keep whatever was extracted,
                    // possibly partial
                    debug!(worker = self.id, url = %job.url, "Non-blocking: {}", analysis.message);
                    return ExtractionResult::success(&job.crawl_id, &job.url, data);
                }
                Some(analysis) => analysis,
            };

            let cancelled = self.queue.is_cancelled(&job.crawl_id).await;
            if analysis.retry_with_alternate_egress
                && attempt < self.settings.max_attempts
                && !cancelled
            {
                info!(
                    worker = self.id,
                    url = %job.url,
                    attempt,
                    category = %analysis.category,
                    "Blocking failure, retrying under alternate egress"
                );

                {
                    let mut manager = self.egress.lock().await;
                    if let Err(e) = manager.mark_current_failed() {
                        debug!(worker = self.id, "Egress rotation unavailable: {}", e);
                    }
                }
                if let Ok(next) = self.fingerprints.rotate_from(&fingerprint.name) {
                    fingerprint = next;
                }

                last_analysis = Some(analysis);
                continue;
            }

            return ExtractionResult::failed(
                &job.crawl_id,
                &job.url,
                data,
                analysis.message.clone(),
                analysis.category,
            );
        }

        // Retry budget exhausted: the last analysis is the terminal verdict
        match last_analysis {
            Some(analysis) => ExtractionResult::failed(
                &job.crawl_id,
                &job.url,
                Value::Null,
                analysis.message.clone(),
                analysis.category,
            ),
            None => ExtractionResult::failed(
                &job.crawl_id,
                &job.url,
                Value::Null,
                last_infra_error
                    .unwrap_or_else(|| "browser infrastructure unavailable".to_string()),
                ErrorCategory::Unknown,
            ),
        }
    }

    /// Effective schema for a job: the crawl's own schema, else the schema
    /// store's entry for the URL's hostname, else the built-in default
    async fn resolve_schema(&self, job: &CrawlJob) -> Option<SelectorSchema> {
        match self.crawl_store.get(&job.crawl_id).await {
            Ok(Some(crawl)) => {
                if crawl.schema.is_some() {
                    return crawl.schema;
                }
            }
            Ok(None) => warn!(crawl_id = %job.crawl_id, "Job for unknown crawl"),
            Err(e) => warn!(crawl_id = %job.crawl_id, "Crawl lookup failed: {}", e),
        }

        let hostname = Url::parse(&job.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))?;

        match self.schema_store.lookup(&hostname).await {
            Ok(schema) => schema,
            Err(e) => {
                warn!(hostname, "Schema lookup failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::Duration;

    use crate::browser::FetchedPage;
    use crate::cli::config::{
        BrowserFingerprint, EgressEndpoint, EgressSettings, Viewport, WorkerSettings,
    };
    use crate::crawler::job::{Crawl, ResultStatus};
    use crate::crawler::limiter::RateLimiter;
    use crate::extract::{FieldSelector, FieldType};
    use crate::storage::{MemoryCrawlStore, MemoryResultStore, MemorySchemaStore};

    /// Scripted fetch outcomes, consumed in order per URL
    enum Step {
        Page(FetchedPage),
        Timeout,
        Navigation(String),
        Session(String),
    }

    struct ScriptedFetcher {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _egress: Option<&EgressEndpoint>,
            _fingerprint: &BrowserFingerprint,
        ) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().await.pop_front().expect("script exhausted");
            match step {
                Step::Page(page) => Ok(page),
                Step::Timeout => Err(FetchError::Timeout(30)),
                Step::Navigation(msg) => Err(FetchError::Navigation(msg)),
                Step::Session(msg) => Err(FetchError::Session(msg)),
            }
        }
    }

    fn healthy_page(html: &str) -> FetchedPage {
        let document = Html::parse_document(html);
        let title = document
            .select(&scraper::Selector::parse("title").unwrap())
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();
        FetchedPage {
            http_status: Some(200),
            title,
            body_text: "x".repeat(200),
            html: html.to_string(),
            ..Default::default()
        }
    }

    struct Fixture {
        crawl_store: Arc<MemoryCrawlStore>,
        result_store: Arc<MemoryResultStore>,
        schema_store: Arc<MemorySchemaStore>,
        events: Arc<EventBus>,
        queue: Arc<JobQueue>,
        aggregator: Arc<CompletionAggregator>,
    }

    fn fixture() -> Fixture {
        let crawl_store = Arc::new(MemoryCrawlStore::new());
        let result_store = Arc::new(MemoryResultStore::new());
        let events = Arc::new(EventBus::new());
        let aggregator = Arc::new(CompletionAggregator::new(
            crawl_store.clone() as Arc<dyn CrawlStore>,
            result_store.clone() as Arc<dyn ResultStore>,
            events.clone(),
        ));
        Fixture {
            crawl_store,
            result_store,
            schema_store: Arc::new(MemorySchemaStore::new()),
            events,
            queue: Arc::new(JobQueue::new(Arc::new(RateLimiter::new(
                100,
                Duration::from_secs(1),
            )))),
            aggregator,
        }
    }

    fn worker(f: &Fixture, fetcher: Arc<ScriptedFetcher>, max_attempts: u32) -> Worker {
        Worker {
            id: 0,
            settings: WorkerSettings {
                worker_count: 1,
                max_attempts,
                navigation_timeout_secs: 30,
            },
            queue: f.queue.clone(),
            fetcher,
            crawl_store: f.crawl_store.clone() as Arc<dyn CrawlStore>,
            schema_store: f.schema_store.clone() as Arc<dyn SchemaStore>,
            result_store: f.result_store.clone() as Arc<dyn ResultStore>,
            events: f.events.clone(),
            aggregator: f.aggregator.clone(),
            egress: Arc::new(Mutex::new(EgressManager::new(EgressSettings {
                enabled: false,
                endpoints: vec![],
                probe_url: String::new(),
            }))),
            fingerprints: Arc::new(FingerprintManager::new(vec![BrowserFingerprint {
                name: "test".to_string(),
                user_agent: "test".to_string(),
                accept_language: "en".to_string(),
                viewport: Viewport { width: 800, height: 600 },
            }])),
        }
    }

    fn job(crawl_id: &str, url: &str) -> CrawlJob {
        CrawlJob {
            job_id: "j1".to_string(),
            crawl_id: crawl_id.to_string(),
            url: url.to_string(),
        }
    }

    async fn seed_crawl(f: &Fixture, id: &str, url: &str, schema: Option<SelectorSchema>) {
        f.crawl_store
            .insert(Crawl::new(id, vec![url.to_string()], schema))
            .await
            .unwrap();
        f.aggregator.crawl_started(id, 1).await;
    }

    #[tokio::test]
    async fn test_successful_job_emits_full_event_sequence() {
        let f = fixture();
        let schema = SelectorSchema::new(vec![FieldSelector {
            name: "title".to_string(),
            query: "h1".to_string(),
            field_type: FieldType::Text,
            attribute: None,
            children: vec![],
        }]);
        seed_crawl(&f, "c1", "https://a.example/", Some(schema)).await;

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Page(healthy_page(
            "<html><head><title>T</title></head><body><h1>Hello</h1></body></html>",
        ))]));
        let mut rx = f.events.subscribe("c1").await;

        worker(&f, fetcher, 3).process_job(job("c1", "https://a.example/")).await;

        let stages: Vec<JobStage> = vec![
            match rx.recv().await.unwrap() {
                CrawlEvent::Job(e) => e.stage,
                _ => panic!(),
            },
            match rx.recv().await.unwrap() {
                CrawlEvent::Job(e) => e.stage,
                _ => panic!(),
            },
            match rx.recv().await.unwrap() {
                CrawlEvent::Job(e) => {
                    let result = e.result.unwrap();
                    assert_eq!(result.status, ResultStatus::Success);
                    assert_eq!(
                        result.data.get("title").and_then(Value::as_text),
                        Some("Hello")
                    );
                    e.stage
                }
                _ => panic!(),
            },
        ];
        assert_eq!(stages, vec![JobStage::Started, JobStage::Saving, JobStage::Success]);

        // Single-job crawl finalizes right after the job terminal event
        assert!(matches!(
            rx.recv().await.unwrap(),
            CrawlEvent::Finished { status, .. } if status == crate::crawler::job::CrawlStatus::Completed
        ));
    }

    #[tokio::test]
    async fn test_three_timeouts_exhaust_retry_budget() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://slow.example/", None).await;

        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Timeout,
            Step::Timeout,
            Step::Timeout,
        ]));

        worker(&f, fetcher.clone(), 3)
            .process_job(job("c1", "https://slow.example/"))
            .await;

        assert_eq!(fetcher.call_count(), 3);
        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert_eq!(results[0].error_category, Some(ErrorCategory::Timeout));
    }

    #[tokio::test]
    async fn test_404_fails_without_retry() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://gone.example/", None).await;

        let mut page = healthy_page("<html><body>gone</body></html>");
        page.http_status = Some(404);
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Page(page)]));

        worker(&f, fetcher.clone(), 3)
            .process_job(job("c1", "https://gone.example/"))
            .await;

        assert_eq!(fetcher.call_count(), 1);
        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert_eq!(results[0].error_category, Some(ErrorCategory::Http));
    }

    #[tokio::test]
    async fn test_retryable_503_then_success() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://flaky.example/", None).await;

        let mut blocked = healthy_page("<html><body>blocked</body></html>");
        blocked.http_status = Some(503);
        let ok = healthy_page(
            "<html><head><title>Shop</title></head><body><h1>Open</h1></body></html>",
        );

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Page(blocked), Step::Page(ok)]));
        worker(&f, fetcher.clone(), 3)
            .process_job(job("c1", "https://flaky.example/"))
            .await;

        assert_eq!(fetcher.call_count(), 2);
        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        assert_eq!(results[0].status, ResultStatus::Success);
    }

    #[tokio::test]
    async fn test_thin_body_is_non_blocking_partial_success() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://thin.example/", None).await;

        let mut page = healthy_page("<html><head><title>App</title></head><body></body></html>");
        page.body_text = "loading".to_string();
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Page(page)]));

        worker(&f, fetcher.clone(), 3)
            .process_job(job("c1", "https://thin.example/"))
            .await;

        assert_eq!(fetcher.call_count(), 1);
        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        assert_eq!(results[0].status, ResultStatus::Success);
    }

    #[tokio::test]
    async fn test_session_failures_surface_as_infrastructure_error() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://a.example/", None).await;

        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Step::Session("connection refused".to_string()),
            Step::Session("connection refused".to_string()),
            Step::Session("connection refused".to_string()),
        ]));

        worker(&f, fetcher.clone(), 3)
            .process_job(job("c1", "https://a.example/"))
            .await;

        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("browser infrastructure unavailable"));
    }

    #[tokio::test]
    async fn test_schema_store_used_when_crawl_has_none() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://shop.example/item", None).await;
        f.schema_store
            .register(
                "shop.example",
                SelectorSchema::new(vec![FieldSelector {
                    name: "name".to_string(),
                    query: ".product-name".to_string(),
                    field_type: FieldType::Text,
                    attribute: None,
                    children: vec![],
                }]),
            )
            .await;

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Page(healthy_page(
            r#"<html><head><title>Item</title></head><body><p class="product-name">Lamp</p></body></html>"#,
        ))]));

        worker(&f, fetcher, 3)
            .process_job(job("c1", "https://shop.example/item"))
            .await;

        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        assert_eq!(
            results[0].data.get("name").and_then(Value::as_text),
            Some("Lamp")
        );
    }

    #[tokio::test]
    async fn test_default_extraction_without_any_schema() {
        let f = fixture();
        seed_crawl(&f, "c1", "https://plain.example/", None).await;

        let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Page(healthy_page(
            "<html><head><title>Plain</title></head><body><h1>A</h1><h1>B</h1></body></html>",
        ))]));

        worker(&f, fetcher, 3)
            .process_job(job("c1", "https://plain.example/"))
            .await;

        let results = f.result_store.find_by_crawl("c1").await.unwrap();
        let data = &results[0].data;
        assert_eq!(data.get("title").and_then(Value::as_text), Some("Plain"));
        assert_eq!(data.get("h1Tags").and_then(Value::as_list).unwrap().len(), 2);
    }
}
