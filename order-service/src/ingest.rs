use shared::Order;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::OrderCache;
use crate::source::{InboundMessage, MessageSource};
use crate::store::OrderStore;

/// What happened to a single fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Persisted, cached and committed.
    Committed,
    /// Persistence failed; the message stays uncommitted and is fetched again.
    Deferred,
    /// Undecodable; committed without persisting so the partition moves on.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub committed: u64,
    pub deferred: u64,
    pub skipped: u64,
}

/// Capped exponential delay between redeliveries of a failing message.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5))
    }
}

/// Sequential broker → store → cache → commit loop.
///
/// One message is in flight at a time: the next fetch happens only after the
/// previous message was committed, skipped, or rewound for redelivery.
pub struct OrderIngestor {
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
    backoff: Backoff,
}

impl OrderIngestor {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<OrderCache>) -> Self {
        Self {
            store,
            cache,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consumes until `cancel` fires. Cancellation interrupts a blocked fetch
    /// or a backoff sleep, never a store write already underway.
    pub async fn run<S: MessageSource>(mut self, source: &mut S, cancel: CancellationToken) -> IngestStats {
        let mut stats = IngestStats::default();
        info!("Order ingestion started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = source.fetch() => fetched,
            };

            let message = match fetched {
                Ok(message) => message,
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    if !self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            match self.process(source, &message).await {
                Outcome::Committed => {
                    stats.committed += 1;
                    self.backoff.reset();
                }
                Outcome::Skipped => stats.skipped += 1,
                Outcome::Deferred => {
                    stats.deferred += 1;
                    if let Err(e) = source.rewind(&message).await {
                        error!(
                            "Error rewinding partition={} offset={}: {}",
                            message.partition, message.offset, e
                        );
                    }
                    if !self.pause(&cancel).await {
                        break;
                    }
                }
            }
        }

        info!(
            committed = stats.committed,
            deferred = stats.deferred,
            skipped = stats.skipped,
            "Order ingestion stopped"
        );
        stats
    }

    /// Drives one message through decode, persist, cache and commit.
    pub async fn process<S: MessageSource>(&self, source: &mut S, message: &InboundMessage) -> Outcome {
        let order = match Order::decode(&message.payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    "Skipping invalid message partition={} offset={}: {}",
                    message.partition, message.offset, e
                );
                self.commit(source, message).await;
                return Outcome::Skipped;
            }
        };

        if let Err(e) = self.store.upsert(&order).await {
            error!(
                "Upsert of order {} failed partition={} offset={}: {}",
                order.id(),
                message.partition,
                message.offset,
                e
            );
            return Outcome::Deferred;
        }

        let order_uid = order.order_uid.clone();
        self.cache.set(order);
        self.commit(source, message).await;

        info!(
            "Saved order {} key={} partition={} offset={}",
            order_uid,
            message.key.as_deref().map(String::from_utf8_lossy).unwrap_or_default(),
            message.partition,
            message.offset
        );
        Outcome::Committed
    }

    /// A failed commit is only logged: the message may come back, and
    /// replaying it is harmless.
    async fn commit<S: MessageSource>(&self, source: &mut S, message: &InboundMessage) {
        if let Err(e) = source.commit(message).await {
            error!(
                "Error committing partition={} offset={}: {}",
                message.partition, message.offset, e
            );
        }
    }

    /// Sleeps for the next backoff delay. Returns `false` if cancelled first.
    async fn pause(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
