use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::crawler::job::{CrawlError, CrawlJob};
use crate::crawler::limiter::RateLimiter;

/// In-core job queue with one lane per crawl.
///
/// Lanes are FIFO and served round-robin so no crawl starves another; every
/// dispatch passes through one shared rate limiter so no set of crawls floods
/// target sites. The queue issues exactly one attempt per job; retry policy
/// lives in the worker next to the failure classifier.
pub struct JobQueue {
    limiter: Arc<RateLimiter>,
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    /// FIFO lane per crawl id
    lanes: HashMap<String, VecDeque<CrawlJob>>,
    /// Round-robin order over lanes that currently hold jobs
    order: VecDeque<String>,
    /// Crawls whose dispatch has been stopped
    cancelled: HashSet<String>,
    closed: bool,
}

impl JobQueue {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            state: Mutex::new(QueueState {
                lanes: HashMap::new(),
                order: VecDeque::new(),
                cancelled: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue one job per URL for a crawl.
    ///
    /// All URLs are validated before any job is created; a single malformed
    /// URL rejects the whole call synchronously and nothing is enqueued.
    pub async fn enqueue_crawl(
        &self,
        crawl_id: &str,
        urls: &[String],
    ) -> Result<Vec<String>, CrawlError> {
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

        let jobs: Vec<CrawlJob> = urls
            .iter()
            .map(|url| CrawlJob {
                job_id: Uuid::new_v4().to_string(),
                crawl_id: crawl_id.to_string(),
                url: url.clone(),
            })
            .collect();
        let job_ids: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();

        {
            let mut state = self.state.lock().await;
            state.cancelled.remove(crawl_id);
            let lane = state.lanes.entry(crawl_id.to_string()).or_default();
            let was_empty = lane.is_empty();
            lane.extend(jobs);
            if was_empty {
                state.order.push_back(crawl_id.to_string());
            }
        }

        debug!(crawl_id, jobs = job_ids.len(), "Enqueued crawl jobs");
        self.notify.notify_waiters();

        Ok(job_ids)
    }

    /// Take the next job, waiting for one to appear.
    ///
    /// Returns `None` once the queue is closed and drained. The shared rate
    /// limiter is consulted after a job is selected, so waiting for a token
    /// never blocks the lane bookkeeping.
    pub async fn pop(&self) -> Option<CrawlJob> {
        loop {
            // Register for wakeups before inspecting state so a notification
            // between unlock and await is not lost
            let notified = self.notify.notified();

            let job = {
                let mut state = self.state.lock().await;
                if let Some(job) = Self::take_next(&mut state) {
                    Some(job)
                } else if state.closed {
                    return None;
                } else {
                    None
                }
            };

            match job {
                Some(job) => {
                    self.limiter.acquire().await;
                    return Some(job);
                }
                None => notified.await,
            }
        }
    }

    fn take_next(state: &mut QueueState) -> Option<CrawlJob> {
        while let Some(crawl_id) = state.order.pop_front() {
            if let Some(lane) = state.lanes.get_mut(&crawl_id) {
                if let Some(job) = lane.pop_front() {
                    if lane.is_empty() {
                        state.lanes.remove(&crawl_id);
                    } else {
                        state.order.push_back(crawl_id);
                    }
                    return Some(job);
                }
                state.lanes.remove(&crawl_id);
            }
        }
        None
    }

    /// Stop further dispatch for a crawl, dropping its undispatched jobs.
    /// Returns how many jobs were dropped.
    pub async fn cancel(&self, crawl_id: &str) -> usize {
        let mut state = self.state.lock().await;
        state.cancelled.insert(crawl_id.to_string());
        state.order.retain(|id| id != crawl_id);
        let dropped = state.lanes.remove(crawl_id).map(|lane| lane.len()).unwrap_or(0);
        debug!(crawl_id, dropped, "Cancelled crawl dispatch");
        dropped
    }

    pub async fn is_cancelled(&self, crawl_id: &str) -> bool {
        self.state.lock().await.cancelled.contains(crawl_id)
    }

    /// Number of jobs waiting in a crawl's lane
    pub async fn pending_count(&self, crawl_id: &str) -> usize {
        self.state
            .lock()
            .await
            .lanes
            .get(crawl_id)
            .map(|lane| lane.len())
            .unwrap_or(0)
    }

    /// Close the queue; workers drain remaining jobs and then exit
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}
