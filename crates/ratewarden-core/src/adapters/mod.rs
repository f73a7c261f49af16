//! Provider adapters.
//!
//! One adapter per external rate source. Each adapter owns its transport,
//! circuit breaker, request budget, and stats; normalization of the two wire
//! shapes (flat number, `{rate,bid,ask}` object) happens here and nowhere
//! else.
//!
//! | Adapter | Shape | Auth | Streaming | Reliability |
//! |---------|-------|------|-----------|-------------|
//! | [`OpenRatesAdapter`] | flat number | none | no | 0.85 |
//! | [`FxGatewayAdapter`] | object | API-key header | no | 0.95 |
//! | [`PulseFxAdapter`] | flat number | bearer token | yes | 0.90 |
//!
//! Adapters default to deterministic mock mode (no network); supplying a real
//! transport switches them to live calls.

mod fxgateway;
mod openrates;
mod pulsefx;

pub use fxgateway::FxGatewayAdapter;
pub use openrates::OpenRatesAdapter;
pub use pulsefx::PulseFxAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::circuit_breaker::CircuitBreaker;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::rate_source::{FetchRequest, QuoteBatch, SourceError};
use crate::throttling::ThrottlingQueue;
use crate::{CurrencyCode, PairSymbol, ProviderId, RawQuote, UtcDateTime};

/// Either wire shape a provider may use for one rate value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireRate {
    Flat(f64),
    Detailed {
        rate: f64,
        #[serde(default)]
        bid: Option<f64>,
        #[serde(default)]
        ask: Option<f64>,
    },
}

impl WireRate {
    /// Collapse to `(rate, bid, ask)`.
    pub fn normalize(self) -> (f64, Option<f64>, Option<f64>) {
        match self {
            Self::Flat(rate) => (rate, None, None),
            Self::Detailed { rate, bid, ask } => (rate, bid, ask),
        }
    }
}

/// Breaker-and-budget gate every pull adapter routes its HTTP calls through.
pub(crate) struct GatedHttp {
    provider: &'static str,
    client: Arc<dyn HttpClient>,
    breaker: CircuitBreaker,
    throttle: ThrottlingQueue,
}

impl GatedHttp {
    pub(crate) fn new(
        provider: &'static str,
        client: Arc<dyn HttpClient>,
        requests_per_minute: u32,
    ) -> Self {
        Self {
            provider,
            client,
            breaker: CircuitBreaker::default(),
            throttle: ThrottlingQueue::per_minute(requests_per_minute),
        }
    }

    /// breaker → budget → GET → status mapping.
    ///
    /// Rate-limit (429) and auth (401/403) responses are upstream verdicts,
    /// not transport faults; they leave the circuit alone.
    pub(crate) async fn get(
        &self,
        url: String,
        auth: Option<&HttpAuth>,
        timeout_ms: u64,
    ) -> Result<String, SourceError> {
        if !self.breaker.allow_request() {
            return Err(SourceError::unavailable(format!(
                "{} circuit breaker is open",
                self.provider
            )));
        }
        if let Err(wait) = self.throttle.acquire() {
            return Err(SourceError::rate_limited(format!(
                "{} request budget exhausted; retry in {:.2}s",
                self.provider,
                wait.as_secs_f64()
            )));
        }

        let mut request = HttpRequest::get(url).with_timeout_ms(timeout_ms);
        if let Some(auth) = auth {
            request = request.with_auth(auth);
        }
        let response = self.client.execute(request).await.map_err(|error| {
            self.breaker.on_failure();
            if error.timed_out() {
                SourceError::timeout(format!("{} timed out: {}", self.provider, error.message()))
            } else {
                SourceError::unavailable(format!(
                    "{} transport error: {}",
                    self.provider,
                    error.message()
                ))
            }
        })?;

        match response.status {
            429 => Err(SourceError::rate_limited(format!(
                "{} returned 429",
                self.provider
            ))),
            401 | 403 => Err(SourceError::unauthorized(format!(
                "{} rejected credentials with status {}",
                self.provider, response.status
            ))),
            status if !response.is_success() => {
                self.breaker.on_failure();
                Err(SourceError::unavailable(format!(
                    "{} returned status {status}",
                    self.provider
                )))
            }
            _ => {
                self.breaker.on_success();
                Ok(response.body)
            }
        }
    }
}

/// `?symbols=` parameter value for a fetch request's targets.
pub(crate) fn symbols_param(targets: &[CurrencyCode]) -> String {
    let joined = targets
        .iter()
        .map(CurrencyCode::as_str)
        .collect::<Vec<_>>()
        .join(",");
    urlencoding::encode(&joined).into_owned()
}

/// Turn a parsed currency→rate map into quotes for the requested targets,
/// skipping entries that fail to parse or validate.
pub(crate) fn quotes_from_map(
    provider: &ProviderId,
    req: &FetchRequest,
    rates: HashMap<String, WireRate>,
    timestamp: UtcDateTime,
    reliability: f64,
) -> Vec<RawQuote> {
    let mut quotes = Vec::with_capacity(rates.len());
    for (code, wire) in rates {
        let Ok(target) = CurrencyCode::parse(&code) else {
            tracing::debug!(provider = %provider, code, "skipping unparseable currency");
            continue;
        };
        if !req.targets.contains(&target) {
            continue;
        }
        let Ok(pair) = PairSymbol::new(req.base.clone(), target) else {
            continue;
        };
        let (rate, bid, ask) = wire.normalize();
        match RawQuote::new(provider.clone(), pair, rate, bid, ask, timestamp, reliability) {
            Ok(quote) => quotes.push(quote),
            Err(error) => {
                tracing::debug!(provider = %provider, %error, "dropping invalid quote");
            }
        }
    }
    quotes
}

/// Deterministic offline batch for one fetch request.
pub(crate) fn mock_quote_batch(
    provider: &ProviderId,
    req: &FetchRequest,
    reliability: f64,
    skew: f64,
    half_spread_ratio: Option<f64>,
) -> QuoteBatch {
    let timestamp = UtcDateTime::now();
    let quotes = req
        .targets
        .iter()
        .filter_map(|target| {
            let rate = mock_rate(&req.base, target, skew)?;
            let pair = PairSymbol::new(req.base.clone(), target.clone()).ok()?;
            let (bid, ask) = match half_spread_ratio {
                Some(ratio) => {
                    let half = rate * ratio;
                    (Some(rate - half), Some(rate + half))
                }
                None => (None, None),
            };
            RawQuote::new(provider.clone(), pair, rate, bid, ask, timestamp, reliability).ok()
        })
        .collect();
    QuoteBatch { quotes }
}

/// Reference USD value of one unit of `code`, used by mock mode.
fn reference_usd_rate(code: &str) -> Option<f64> {
    Some(match code {
        "USD" => 1.0,
        "EUR" => 0.92,
        "GBP" => 0.79,
        "JPY" => 155.2,
        "CHF" => 0.88,
        "CAD" => 1.36,
        "AUD" => 1.52,
        "NZD" => 1.64,
        "CNY" => 7.24,
        "INR" => 83.1,
        "MXN" => 17.1,
        "BRL" => 4.95,
        "SGD" => 1.34,
        "SEK" => 10.4,
        _ => return None,
    })
}

/// Deterministic mock rate for `base -> target`.
///
/// `skew` is a small per-provider offset so multi-provider consolidation sees
/// realistic dispersion in offline mode.
pub(crate) fn mock_rate(base: &CurrencyCode, target: &CurrencyCode, skew: f64) -> Option<f64> {
    let base_usd = reference_usd_rate(base.as_str())?;
    let target_usd = reference_usd_rate(target.as_str())?;
    Some(target_usd / base_usd * (1.0 + skew))
}
