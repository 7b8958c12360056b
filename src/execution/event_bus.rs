//! Sharded consumer for SDK response events
//!
//! Events are routed to a shard by the runtime id of the node they concern.
//! Each shard is consumed by one task in arrival order, so events of the same
//! node are applied in the order they were published while different nodes
//! proceed concurrently.

use crate::execution::dispatch::SdkResponseEvent;
use crate::execution::error::EngineError;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives events taken off a shard
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn consume(&self, event: SdkResponseEvent);
}

pub struct EventBus {
    shards: Vec<mpsc::UnboundedSender<SdkResponseEvent>>,
    consumers: Vec<JoinHandle<()>>,
}

impl EventBus {
    pub fn new(shard_count: usize, sink: Weak<dyn EventSink>) -> Self {
        let mut shards = Vec::with_capacity(shard_count.max(1));
        let mut consumers = Vec::with_capacity(shard_count.max(1));

        for shard_id in 0..shard_count.max(1) {
            let (tx, mut rx) = mpsc::unbounded_channel::<SdkResponseEvent>();
            let sink = sink.clone();
            consumers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let Some(sink) = sink.upgrade() else {
                        warn!("Event shard {} stopping, engine is gone", shard_id);
                        break;
                    };
                    sink.consume(event).await;
                }
                debug!("Event shard {} stopped", shard_id);
            }));
            shards.push(tx);
        }

        Self { shards, consumers }
    }

    /// Shard an event key is consumed on
    pub fn shard_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Publish an event without waiting for it to be consumed
    pub fn publish(&self, event: SdkResponseEvent) -> Result<(), EngineError> {
        let shard = self.shard_for(event.routing_key());
        debug!(
            "Publishing {} for {} on shard {}",
            event.event_type,
            event.context.describe(),
            shard
        );
        self.shards[shard]
            .send(event)
            .map_err(|_| EngineError::EngineShutDown)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
    }
}
