use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::adapters::{mock_quote_batch, quotes_from_map, symbols_param, GatedHttp, WireRate};
use crate::http_client::{HttpClient, NoopHttpClient};
use crate::rate_source::{FetchRequest, ProviderStatsTracker, QuoteBatch, RateSource, SourceError};
use crate::{ProviderId, ProviderStats, UtcDateTime};

const MOCK_SKEW: f64 = 0.0005;
const RELIABILITY: f64 = 0.85;
const REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Keyless community rate API returning a flat currency→number map.
pub struct OpenRatesAdapter {
    gate: GatedHttp,
    base_url: String,
    stats: ProviderStatsTracker,
    use_real_api: bool,
}

impl Default for OpenRatesAdapter {
    fn default() -> Self {
        Self {
            gate: GatedHttp::new("openrates", Arc::new(NoopHttpClient), 60),
            base_url: String::from("https://api.openrates.example/v1"),
            stats: ProviderStatsTracker::default(),
            use_real_api: false,
        }
    }
}

impl OpenRatesAdapter {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        let use_real_api = !http_client.is_mock();
        Self {
            gate: GatedHttp::new("openrates", http_client, 60),
            use_real_api,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_inner(&self, req: &FetchRequest) -> Result<QuoteBatch, SourceError> {
        if !self.use_real_api {
            return Ok(mock_quote_batch(&self.id(), req, RELIABILITY, MOCK_SKEW, None));
        }

        let url = format!(
            "{}/latest?base={}&symbols={}",
            self.base_url,
            req.base,
            symbols_param(&req.targets)
        );
        let body = self.gate.get(url, None, REQUEST_TIMEOUT_MS).await?;

        let payload: OpenRatesResponse = serde_json::from_str(&body).map_err(|error| {
            SourceError::malformed_payload(format!("openrates payload did not parse: {error}"))
        })?;

        let timestamp = payload
            .timestamp
            .and_then(|seconds| UtcDateTime::from_unix_timestamp(seconds).ok())
            .unwrap_or_else(UtcDateTime::now);

        Ok(QuoteBatch {
            quotes: quotes_from_map(&self.id(), req, payload.rates, timestamp, RELIABILITY),
        })
    }
}

impl RateSource for OpenRatesAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::new("openrates")
    }

    fn reliability(&self) -> f64 {
        RELIABILITY
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
}

#[derive(Debug, Deserialize)]
struct OpenRatesResponse {
    #[allow(dead_code)]
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    rates: HashMap<String, WireRate>,
}
