use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crawler::events::{CrawlEvent, EventBus};
use crate::crawler::job::{CrawlStatus, ResultStatus};
use crate::storage::{CrawlStore, ResultStore};

/// Tracks per-crawl job completion and computes the final crawl status.
///
/// Counters live in a mutex-guarded map keyed by crawl id; the counter for a
/// crawl is created on its first job start and removed in the same critical
/// section that observes the last terminal event, so finalization happens
/// exactly once no matter how many workers race on it.
pub struct CompletionAggregator {
    crawl_store: Arc<dyn CrawlStore>,
    result_store: Arc<dyn ResultStore>,
    events: Arc<EventBus>,
    counters: Mutex<HashMap<String, Counter>>,
}

struct Counter {
    total: usize,
    completed: usize,
}

impl CompletionAggregator {
    pub fn new(
        crawl_store: Arc<dyn CrawlStore>,
        result_store: Arc<dyn ResultStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            crawl_store,
            result_store,
            events,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Record that a crawl's jobs have started dispatching. Idempotent: only
    /// the first call for a crawl initializes the counter.
    pub async fn crawl_started(&self, crawl_id: &str, total_jobs: usize) {
        let mut counters = self.counters.lock().await;
        counters
            .entry(crawl_id.to_string())
            .or_insert(Counter { total: total_jobs, completed: 0 });
        debug!(crawl_id, total_jobs, "Tracking crawl completion");
    }

    /// Record one job reaching a terminal state. When the last job lands,
    /// computes and persists the final crawl status and publishes the
    /// crawl-level terminal event.
    pub async fn job_finished(&self, crawl_id: &str) -> Result<Option<CrawlStatus>> {
        let finalize = {
            let mut counters = self.counters.lock().await;
            let Some(counter) = counters.get_mut(crawl_id) else {
                warn!(crawl_id, "Terminal event for untracked crawl");
                return Ok(None);
            };

            counter.completed += 1;
            debug!(
                crawl_id,
                completed = counter.completed,
                total = counter.total,
                "Job terminal"
            );

            if counter.completed >= counter.total {
                // Removing the counter here makes this branch unreachable for
                // every other racing terminal event
                counters.remove(crawl_id);
                true
            } else {
                false
            }
        };

        if !finalize {
            return Ok(None);
        }

        let status = self.finalize(crawl_id).await?;
        Ok(Some(status))
    }

    /// Number of jobs a cancelled crawl will no longer run; shrinks the
    /// counter so the crawl still finalizes from in-flight jobs alone
    pub async fn jobs_cancelled(&self, crawl_id: &str, dropped: usize) -> Result<Option<CrawlStatus>> {
        let finalize = {
            let mut counters = self.counters.lock().await;
            let Some(counter) = counters.get_mut(crawl_id) else {
                return Ok(None);
            };

            counter.total = counter.total.saturating_sub(dropped);
            if counter.completed >= counter.total {
                counters.remove(crawl_id);
                true
            } else {
                false
            }
        };

        if !finalize {
            return Ok(None);
        }

        let status = self.finalize(crawl_id).await?;
        Ok(Some(status))
    }

    async fn finalize(&self, crawl_id: &str) -> Result<CrawlStatus> {
        let results = self.result_store.find_by_crawl(crawl_id).await?;
        let failed = results
            .iter()
            .filter(|r| r.status == ResultStatus::Failed)
            .count();

        let status = if failed > 0 {
            CrawlStatus::Failed
        } else {
            CrawlStatus::Completed
        };
        let error = if failed > 0 {
            Some(format!("{} of {} jobs failed", failed, results.len()))
        } else {
            None
        };

        self.crawl_store
            .set_status(crawl_id, status, Some(Utc::now()), error)
            .await?;

        self.events
            .publish(
                crawl_id,
                CrawlEvent::Finished {
                    crawl_id: crawl_id.to_string(),
                    status,
                },
            )
            .await;
        self.events.close(crawl_id).await;

        info!(crawl_id, %status, "Crawl finalized");
        Ok(status)
    }
}
