pub mod browser;
pub mod classify;
pub mod cli;
pub mod crawler;
pub mod egress;
pub mod extract;
pub mod storage;
pub mod utils;

pub use crawler::{CrawlerController, CrawlEvent, CrawlStatus, ExtractionResult};
pub use extract::{SelectorSchema, Value};
