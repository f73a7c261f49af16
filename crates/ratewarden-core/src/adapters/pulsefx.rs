use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::adapters::{
    mock_quote_batch, mock_rate, quotes_from_map, symbols_param, GatedHttp, WireRate,
};
use crate::http_client::{HttpAuth, HttpClient, NoopHttpClient};
use crate::rate_source::{
    FetchRequest, ProviderStatsTracker, QuoteBatch, RateSource, RateStream, SourceError,
    StreamRequest,
};
use crate::stream_transport::{ScriptedTransport, StreamTransport};
use crate::{PairSymbol, ProviderId, ProviderStats, RawQuote, UtcDateTime};

const MOCK_SKEW: f64 = 0.0010;
const RELIABILITY: f64 = 0.90;
const REQUEST_TIMEOUT_MS: u64 = 5_000;
const TICK_CHANNEL_CAPACITY: usize = 256;
const MOCK_TICKS_PER_PAIR: usize = 5;

/// Streaming-capable provider: polled like the others, plus a persistent
/// subscription that pushes individual ticks between polling cycles.
pub struct PulseFxAdapter {
    gate: GatedHttp,
    stream_transport: Option<Arc<dyn StreamTransport>>,
    base_url: String,
    stream_url: String,
    api_key: Option<String>,
    stats: ProviderStatsTracker,
    use_real_api: bool,
}

impl Default for PulseFxAdapter {
    fn default() -> Self {
        Self {
            gate: GatedHttp::new("pulsefx", Arc::new(NoopHttpClient), 90),
            stream_transport: None,
            base_url: String::from("https://api.pulsefx.example/v1"),
            stream_url: String::from("wss://stream.pulsefx.example/v1/rates"),
            api_key: None,
            stats: ProviderStatsTracker::default(),
            use_real_api: false,
        }
    }
}

impl PulseFxAdapter {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        let use_real_api = !http_client.is_mock();
        Self {
            gate: GatedHttp::new("pulsefx", http_client, 90),
            api_key: Some(api_key.into()),
            use_real_api,
            ..Self::default()
        }
    }

    /// Replace the streaming transport. Without this the adapter scripts its
    /// own deterministic tick playback.
    pub fn with_stream_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.stream_transport = Some(transport);
        self
    }

    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = stream_url.into();
        self
    }

    async fn fetch_inner(&self, req: &FetchRequest) -> Result<QuoteBatch, SourceError> {
        if !self.use_real_api {
            return Ok(mock_quote_batch(&self.id(), req, RELIABILITY, MOCK_SKEW, None));
        }

        let url = format!(
            "{}/rates?base={}&symbols={}",
            self.base_url,
            req.base,
            symbols_param(&req.targets)
        );
        let auth = self
            .api_key
            .as_deref()
            .map(|key| HttpAuth::BearerToken(key.to_owned()));
        let body = self.gate.get(url, auth.as_ref(), REQUEST_TIMEOUT_MS).await?;

        let payload: PulseFxResponse = serde_json::from_str(&body).map_err(|error| {
            SourceError::malformed_payload(format!("pulsefx payload did not parse: {error}"))
        })?;

        Ok(QuoteBatch {
            quotes: quotes_from_map(
                &self.id(),
                req,
                payload.rates,
                UtcDateTime::now(),
                RELIABILITY,
            ),
        })
    }

    /// Deterministic tick script for offline streaming.
    fn mock_frames(pairs: &[PairSymbol]) -> Vec<String> {
        let mut frames = Vec::with_capacity(pairs.len() * MOCK_TICKS_PER_PAIR);
        for pair in pairs {
            let Some(mid) = mock_rate(pair.base(), pair.quote(), MOCK_SKEW) else {
                continue;
            };
            for tick in 0..MOCK_TICKS_PER_PAIR {
                let jitter = (fastrand::f64() - 0.5) * 0.001;
                let rate = mid * (1.0 + jitter);
                let half_spread = rate * 0.0003;
                // Alternate the rate/price field name; real feeds do both.
                let rate_field = if tick % 2 == 0 { "rate" } else { "price" };
                frames.push(format!(
                    r#"{{"type":"rate_update","data":{{"symbol":"{pair}","{rate_field}":{rate},"bid":{bid},"ask":{ask}}}}}"#,
                    pair = pair,
                    rate = rate,
                    bid = rate - half_spread,
                    ask = rate + half_spread,
                ));
            }
        }
        frames
    }
}

impl RateSource for PulseFxAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::new("pulsefx")
    }

    fn reliability(&self) -> f64 {
        RELIABILITY
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn stats(&self) -> ProviderStats {
        self.stats.snapshot()
    }

    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<QuoteBatch, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.fetch_inner(&req).await;
            match &result {
                Ok(_) => self.stats.record_success(started.elapsed()),
                Err(_) => self.stats.record_failure(started.elapsed()),
            }
            result
        })
    }

    fn connect_stream<'a>(
        &'a self,
        req: StreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RateStream, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();

            let transport: Arc<dyn StreamTransport> = match &self.stream_transport {
                Some(transport) => Arc::clone(transport),
                None => Arc::new(ScriptedTransport::new(Self::mock_frames(&req.pairs))),
            };

            let symbols: Vec<String> = req.pairs.iter().map(ToString::to_string).collect();
            let subscribe = serde_json::json!({
                "type": "subscribe",
                "symbols": symbols,
            })
            .to_string();

            let mut frames = match transport.connect(&self.stream_url, subscribe).await {
                Ok(frames) => {
                    self.stats.record_success(started.elapsed());
                    frames
                }
                Err(error) => {
                    self.stats.record_failure(started.elapsed());
                    return Err(error);
                }
            };

            let provider = self.id();
            let subscribed: HashSet<PairSymbol> = req.pairs.into_iter().collect();
            let (tx, rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);

            let pump = tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    let Some(quote) = parse_stream_frame(&frame, &provider, &subscribed) else {
                        continue;
                    };
                    if tx.send(quote).await.is_err() {
                        break;
                    }
                }
            });

            Ok(RateStream::new(rx, pump))
        })
    }
}

fn parse_stream_frame(
    frame: &str,
    provider: &ProviderId,
    subscribed: &HashSet<PairSymbol>,
) -> Option<RawQuote> {
    let parsed: StreamFrame = match serde_json::from_str(frame) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::debug!(provider = %provider, %error, "dropping unparseable stream frame");
            return None;
        }
    };
    if parsed.kind != "rate_update" {
        return None;
    }
    let tick = parsed.data?;
    let pair = PairSymbol::parse(&tick.symbol).ok()?;
    if !subscribed.contains(&pair) {
        return None;
    }
    let rate = tick.rate.or(tick.price)?;
    let timestamp = tick
        .timestamp
        .as_deref()
        .and_then(|raw| UtcDateTime::parse(raw).ok())
        .unwrap_or_else(UtcDateTime::now);

    RawQuote::new(
        provider.clone(),
        pair,
        rate,
        tick.bid,
        tick.ask,
        timestamp,
        RELIABILITY,
    )
    .ok()
}

#[derive(Debug, Deserialize)]
struct PulseFxResponse {
    rates: HashMap<String, WireRate>,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<StreamTick>,
}

#[derive(Debug, Deserialize)]
struct StreamTick {
    symbol: String,
    #[serde(default)]
    rate: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur_usd() -> PairSymbol {
        PairSymbol::parse("EUR/USD").expect("pair")
    }

    #[tokio::test]
    async fn mock_stream_yields_subscribed_ticks_until_disconnect() {
        let adapter = PulseFxAdapter::default();
        let request = StreamRequest::new(vec![eur_usd()]).expect("request");

        let mut stream = adapter.connect_stream(request).await.expect("connect");

        let mut received = 0;
        while let Some(quote) = stream.next().await {
            assert_eq!(quote.pair, eur_usd());
            assert!(quote.rate > 0.0);
            received += 1;
        }
        assert_eq!(received, MOCK_TICKS_PER_PAIR);
    }

    #[tokio::test]
    async fn unsubscribed_and_malformed_frames_are_dropped() {
        let transport = ScriptedTransport::new(vec![
            String::from("garbage"),
            String::from(r#"{"type":"heartbeat"}"#),
            String::from(r#"{"type":"rate_update","data":{"symbol":"GBP/USD","rate":1.27}}"#),
            String::from(r#"{"type":"rate_update","data":{"symbol":"EUR/USD","price":1.087}}"#),
        ]);
        let adapter = PulseFxAdapter::default().with_stream_transport(Arc::new(transport));
        let request = StreamRequest::new(vec![eur_usd()]).expect("request");

        let mut stream = adapter.connect_stream(request).await.expect("connect");

        let quote = stream.next().await.expect("one surviving tick");
        assert_eq!(quote.pair, eur_usd());
        assert_eq!(quote.rate, 1.087);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn stream_frame_accepts_rate_or_price() {
        let provider = ProviderId::new("pulsefx");
        let subscribed: HashSet<PairSymbol> = [eur_usd()].into_iter().collect();

        let with_rate = parse_stream_frame(
            r#"{"type":"rate_update","data":{"symbol":"EUR/USD","rate":1.09}}"#,
            &provider,
            &subscribed,
        )
        .expect("rate field");
        assert_eq!(with_rate.rate, 1.09);

        let with_price = parse_stream_frame(
            r#"{"type":"rate_update","data":{"symbol":"EUR/USD","price":1.10}}"#,
            &provider,
            &subscribed,
        )
        .expect("price field");
        assert_eq!(with_price.rate, 1.10);
    }
}
