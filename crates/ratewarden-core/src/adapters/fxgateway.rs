use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::adapters::{mock_quote_batch, quotes_from_map, symbols_param, GatedHttp, WireRate};
use crate::http_client::{HttpAuth, HttpClient, NoopHttpClient};
use crate::rate_source::{FetchRequest, ProviderStatsTracker, QuoteBatch, RateSource, SourceError};
use crate::{ProviderId, ProviderStats, UtcDateTime};

const MOCK_SKEW: f64 = -0.0003;
const MOCK_HALF_SPREAD: f64 = 0.0004;
const RELIABILITY: f64 = 0.95;
const REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Commercial rate gateway returning `{rate,bid,ask}` objects per currency.
///
/// Requires an API key in real mode; the credential is injected at
/// construction, never read from the environment here.
pub struct FxGatewayAdapter {
    gate: GatedHttp,
    base_url: String,
    api_key: Option<String>,
    stats: ProviderStatsTracker,
    use_real_api: bool,
}

impl Default for FxGatewayAdapter {
    fn default() -> Self {
        Self {
            gate: GatedHttp::new("fxgateway", Arc::new(NoopHttpClient), 120),
            base_url: String::from("https://api.fxgateway.example/v2"),
            api_key: None,
            stats: ProviderStatsTracker::default(),
            use_real_api: false,
        }
    }
}

impl FxGatewayAdapter {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        let use_real_api = !http_client.is_mock();
        Self {
            gate: GatedHttp::new("fxgateway", http_client, 120),
            api_key: Some(api_key.into()),
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
            return Ok(mock_quote_batch(
                &self.id(),
                req,
                RELIABILITY,
                MOCK_SKEW,
                Some(MOCK_HALF_SPREAD),
            ));
        }

        let Some(api_key) = self.api_key.as_deref().filter(|key| !key.is_empty()) else {
            return Err(SourceError::unauthorized(
                "fxgateway api key is not configured",
            ));
        };

        let url = format!(
            "{}/live?base={}&symbols={}",
            self.base_url,
            req.base,
            symbols_param(&req.targets)
        );
        let auth = HttpAuth::Header {
            name: String::from("x-api-key"),
            value: api_key.to_owned(),
        };
        let body = self.gate.get(url, Some(&auth), REQUEST_TIMEOUT_MS).await?;

        let payload: FxGatewayResponse = serde_json::from_str(&body).map_err(|error| {
            SourceError::malformed_payload(format!("fxgateway payload did not parse: {error}"))
        })?;

        let timestamp = payload
            .timestamp
            .and_then(|raw| UtcDateTime::parse(&raw).ok())
            .unwrap_or_else(UtcDateTime::now);

        Ok(QuoteBatch {
            quotes: quotes_from_map(&self.id(), req, payload.quotes, timestamp, RELIABILITY),
        })
    }
}

impl RateSource for FxGatewayAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::new("fxgateway")
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
struct FxGatewayResponse {
    #[serde(default)]
    timestamp: Option<String>,
    quotes: HashMap<String, WireRate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpRequest, HttpResponse};
    use crate::CurrencyCode;

    struct CannedClient {
        body: &'static str,
        status: u16,
    }

    impl HttpClient for CannedClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            let status = self.status;
            let body = self.body.to_owned();
            Box::pin(async move { Ok(HttpResponse { status, body }) })
        }
    }

    fn request() -> FetchRequest {
        FetchRequest::new(
            CurrencyCode::parse("USD").expect("code"),
            vec![CurrencyCode::parse("EUR").expect("code")],
        )
        .expect("request")
    }

    #[tokio::test]
    async fn mock_quotes_carry_bid_and_ask() {
        let adapter = FxGatewayAdapter::default();
        let batch = adapter.fetch(request()).await.expect("mock fetch");
        let quote = batch.quotes.first().expect("one quote");
        let (bid, ask) = (quote.bid.expect("bid"), quote.ask.expect("ask"));
        assert!(bid < quote.rate && quote.rate < ask);
    }

    #[tokio::test]
    async fn auth_rejection_is_not_retryable() {
        let client = CannedClient {
            status: 401,
            body: "{}",
        };
        let adapter = FxGatewayAdapter::with_http_client(Arc::new(client), "bad-key");

        let err = adapter.fetch(request()).await.expect_err("must fail");
        assert_eq!(err.code(), "provider.unauthorized");
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn parses_object_quotes() {
        let client = CannedClient {
            status: 200,
            body: r#"{"timestamp":"2025-06-01T00:00:00Z",
                "quotes":{"EUR":{"rate":0.921,"bid":0.9205,"ask":0.9215}}}"#,
        };
        let adapter = FxGatewayAdapter::with_http_client(Arc::new(client), "key");

        let batch = adapter.fetch(request()).await.expect("fetch");
        let quote = batch.quotes.first().expect("one quote");
        assert_eq!(quote.rate, 0.921);
        assert_eq!(quote.bid, Some(0.9205));
        assert_eq!(quote.pair.to_string(), "USD/EUR");
    }
}
