use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::crawler::job::{CrawlStatus, ExtractionResult};

const CHANNEL_CAPACITY: usize = 256;

/// Progress stage of a single job, in strict emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Started,
    Saving,
    Success,
    Failed,
}

/// Per-job progress event pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub url: String,
    pub stage: JobStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a subscriber to a crawl's channel can observe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrawlEvent {
    Job(JobEvent),
    /// Terminal event, published exactly once after every job is terminal
    Finished { crawl_id: String, status: CrawlStatus },
}

/// Per-crawl publish/subscribe channel registry.
///
/// Decouples workers and the aggregator from any transport: dashboards and
/// exporters subscribe by crawl id and receive a cancellable stream of typed
/// events.
pub struct EventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<CrawlEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Join a crawl's channel. Subscribing before the crawl starts is valid;
    /// the channel is created on first use.
    pub async fn subscribe(&self, crawl_id: &str) -> broadcast::Receiver<CrawlEvent> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(crawl_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to a crawl's channel. Events published with no
    /// subscribers are dropped silently.
    pub async fn publish(&self, crawl_id: &str, event: CrawlEvent) {
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(crawl_id) {
            // Send only fails when every receiver is gone
            let _ = sender.send(event);
        }
    }

    /// Drop a crawl's channel after its terminal event has been published.
    /// Existing receivers drain buffered events and then see the stream end.
    pub async fn close(&self, crawl_id: &str) {
        let mut channels = self.channels.lock().await;
        if channels.remove(crawl_id).is_some() {
            debug!(crawl_id, "Closed event channel");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_event(stage: JobStage) -> CrawlEvent {
        CrawlEvent::Job(JobEvent {
            job_id: "j1".to_string(),
            url: "https://a.example/".to_string(),
            stage,
            result: None,
            error: None,
        })
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("c1").await;

        bus.publish("c1", job_event(JobStage::Started)).await;
        bus.publish("c1", job_event(JobStage::Saving)).await;
        bus.publish("c1", job_event(JobStage::Success)).await;

        for expected in [JobStage::Started, JobStage::Saving, JobStage::Success] {
            match rx.recv().await.unwrap() {
                CrawlEvent::Job(event) => assert_eq!(event.stage, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_channels_are_isolated_per_crawl() {
        let bus = EventBus::new();
        let mut rx_c1 = bus.subscribe("c1").await;
        let mut rx_c2 = bus.subscribe("c2").await;

        bus.publish("c1", job_event(JobStage::Started)).await;
        bus.publish(
            "c2",
            CrawlEvent::Finished {
                crawl_id: "c2".to_string(),
                status: CrawlStatus::Completed,
            },
        )
        .await;

        assert!(matches!(rx_c1.recv().await.unwrap(), CrawlEvent::Job(_)));
        assert!(matches!(
            rx_c2.recv().await.unwrap(),
            CrawlEvent::Finished { .. }
        ));
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_buffered_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("c1").await;

        bus.publish(
            "c1",
            CrawlEvent::Finished {
                crawl_id: "c1".to_string(),
                status: CrawlStatus::Failed,
            },
        )
        .await;
        bus.close("c1").await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            CrawlEvent::Finished { .. }
        ));
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish("ghost", job_event(JobStage::Started)).await;
    }
}
