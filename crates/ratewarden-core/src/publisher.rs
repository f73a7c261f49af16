//! Rate event fan-out.
//!
//! Best-effort publication of consolidated rates and accepted streaming
//! ticks, keyed by `"BASE/QUOTE"`. Delivery is at-most-once and
//! gap-tolerant; consumers that need the truth read the cache. A publish
//! failure is logged and never reaches the ingestion path.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{ConsolidatedRate, RawQuote, UtcDateTime};

const DEFAULT_BUS_CAPACITY: usize = 512;

/// What a [`RateEvent`] carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RatePayload {
    Consolidated(ConsolidatedRate),
    StreamTick(RawQuote),
}

/// One message-bus record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateEvent {
    /// Topic key, `"BASE/QUOTE"`.
    pub key: String,
    #[serde(flatten)]
    pub payload: RatePayload,
    pub published_at: UtcDateTime,
}

/// In-process message bus backed by a broadcast channel.
///
/// Slow subscribers lag and drop; publishers never block.
pub struct RateBus {
    tx: broadcast::Sender<RateEvent>,
}

impl Default for RateBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }
}

impl RateBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RateEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish_consolidated(&self, rate: &ConsolidatedRate) {
        self.publish(RateEvent {
            key: rate.pair.to_string(),
            payload: RatePayload::Consolidated(rate.clone()),
            published_at: UtcDateTime::now(),
        });
    }

    pub fn publish_stream_tick(&self, quote: &RawQuote) {
        self.publish(RateEvent {
            key: quote.pair.to_string(),
            payload: RatePayload::StreamTick(quote.clone()),
            published_at: UtcDateTime::now(),
        });
    }

    fn publish(&self, event: RateEvent) {
        let key = event.key.clone();
        if self.tx.send(event).is_err() {
            tracing::trace!(key, "rate event published with no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PairSymbol, ProviderId};

    fn quote() -> RawQuote {
        RawQuote::new(
            ProviderId::new("test"),
            PairSymbol::parse("EUR/USD").expect("pair"),
            1.09,
            None,
            None,
            UtcDateTime::now(),
            0.9,
        )
        .expect("quote")
    }

    #[tokio::test]
    async fn subscribers_receive_keyed_events() {
        let bus = RateBus::default();
        let mut rx = bus.subscribe();

        let rate = ConsolidatedRate::from_stream_tick(&quote());
        bus.publish_consolidated(&rate);

        let event = rx.recv().await.expect("event");
        assert_eq!(event.key, "EUR/USD");
        assert!(matches!(event.payload, RatePayload::Consolidated(_)));
    }

    #[test]
    fn publishing_without_subscribers_does_not_panic() {
        let bus = RateBus::default();
        bus.publish_stream_tick(&quote());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stream_ticks_and_snapshots_are_distinguishable() {
        let bus = RateBus::default();
        let mut rx = bus.subscribe();

        bus.publish_stream_tick(&quote());
        let event = rx.recv().await.expect("event");
        assert!(matches!(event.payload, RatePayload::StreamTick(_)));

        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["kind"], "stream_tick");
        assert_eq!(json["key"], "EUR/USD");
    }
}
