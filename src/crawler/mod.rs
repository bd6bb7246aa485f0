pub mod aggregator;
pub mod controller;
pub mod events;
pub mod job;
pub mod limiter;
pub mod queue;
pub mod worker;

// Re-export common types
pub use aggregator::CompletionAggregator;
pub use controller::CrawlerController;
pub use events::{CrawlEvent, EventBus, JobEvent, JobStage};
pub use job::{Crawl, CrawlError, CrawlJob, CrawlStatus, ExtractionResult, ResultStatus};
pub use limiter::RateLimiter;
pub use queue::JobQueue;
pub use worker::Worker;
