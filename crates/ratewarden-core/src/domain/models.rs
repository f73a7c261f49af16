use serde::{Deserialize, Serialize};

use crate::{PairSymbol, ProviderId, UtcDateTime, ValidationError};

/// One normalized quote from a single provider.
///
/// Ephemeral: produced once per fetch or stream message and consumed
/// immediately by the consolidator and validation engine. Both provider wire
/// shapes (flat number and `{rate,bid,ask}`) collapse into this type at the
/// adapter boundary; nothing downstream special-cases source formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub provider: ProviderId,
    pub pair: PairSymbol,
    pub rate: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub timestamp: UtcDateTime,
    /// Static trust weight of the producing provider, 0.0..=1.0.
    pub reliability: f64,
}

impl RawQuote {
    pub fn new(
        provider: ProviderId,
        pair: PairSymbol,
        rate: f64,
        bid: Option<f64>,
        ask: Option<f64>,
        timestamp: UtcDateTime,
        reliability: f64,
    ) -> Result<Self, ValidationError> {
        if !rate.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "rate" });
        }
        for (field, value) in [("bid", bid), ("ask", ask)] {
            if let Some(value) = value {
                if !value.is_finite() {
                    return Err(ValidationError::NonFiniteValue { field });
                }
            }
        }
        if !(0.0..=1.0).contains(&reliability) {
            return Err(ValidationError::ReliabilityOutOfRange { value: reliability });
        }

        Ok(Self {
            provider,
            pair,
            rate,
            bid,
            ask,
            timestamp,
            reliability,
        })
    }
}

/// The single trustworthy rate for a pair produced by one ingestion cycle.
///
/// Superseded, never merged, by the next cycle's result for the same pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedRate {
    pub pair: PairSymbol,
    pub rate: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_ask_spread: Option<f64>,
    /// Inter-provider dispersion: (max − min) / weighted mean × 100.
    pub rate_spread_percent: f64,
    /// 0..=100 confidence in this rate.
    pub quality_score: f64,
    pub provider_count: usize,
    pub providers: Vec<ProviderId>,
    pub timestamp: UtcDateTime,
    /// Provenance: the raw quotes this rate was derived from.
    pub raw_rates: Vec<RawQuote>,
}

impl ConsolidatedRate {
    /// Wrap a single streaming tick as a cacheable rate.
    ///
    /// Streaming ticks get the same fixed quality as a one-provider
    /// consolidation since no cross-check is possible.
    pub fn from_stream_tick(quote: &RawQuote) -> Self {
        let bid_ask_spread = match (quote.bid, quote.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        };
        Self {
            pair: quote.pair.clone(),
            rate: quote.rate,
            bid: quote.bid,
            ask: quote.ask,
            bid_ask_spread,
            rate_spread_percent: 0.0,
            quality_score: crate::consolidator::SINGLE_SOURCE_QUALITY,
            provider_count: 1,
            providers: vec![quote.provider.clone()],
            timestamp: quote.timestamp,
            raw_rates: vec![quote.clone()],
        }
    }
}

/// How a cache lookup resolved the requested pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateProvenance {
    /// The requested pair was cached as-is.
    Direct,
    /// Derived by inverting the opposite pair.
    Inverse,
    /// Derived by bridging both legs through the base currency.
    Cross,
}

/// Outcome of validating one quote or consolidated rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub quality_score: f64,
    /// Rolling z-score based anomaly measure, 0.0..=1.0.
    pub anomaly_score: f64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn rejected(quality_score: f64, errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            quality_score,
            anomaly_score: 0.0,
            warnings: Vec::new(),
            errors,
        }
    }
}

/// Cumulative per-provider health counters.
///
/// Mutated after every fetch attempt; reset only on process restart.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_success: Option<UtcDateTime>,
    pub last_failure: Option<UtcDateTime>,
    pub avg_response_time_ms: f64,
}

impl ProviderStats {
    /// A provider is unhealthy once its failure rate reaches 50%.
    pub fn is_healthy(&self) -> bool {
        self.requests == 0 || self.failures * 2 < self.requests
    }

    pub fn success_percent(&self) -> f64 {
        if self.requests == 0 {
            100.0
        } else {
            self.successes as f64 / self.requests as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CurrencyCode;

    fn pair() -> PairSymbol {
        PairSymbol::new(
            CurrencyCode::parse("EUR").expect("code"),
            CurrencyCode::parse("USD").expect("code"),
        )
        .expect("pair")
    }

    #[test]
    fn quote_rejects_non_finite_rate() {
        let err = RawQuote::new(
            ProviderId::new("test"),
            pair(),
            f64::NAN,
            None,
            None,
            UtcDateTime::now(),
            0.9,
        )
        .expect_err("NaN must fail");
        assert!(matches!(err, ValidationError::NonFiniteValue { field: "rate" }));
    }

    #[test]
    fn quote_rejects_out_of_range_reliability() {
        let err = RawQuote::new(
            ProviderId::new("test"),
            pair(),
            1.1,
            None,
            None,
            UtcDateTime::now(),
            1.5,
        )
        .expect_err("reliability over 1.0 must fail");
        assert!(matches!(err, ValidationError::ReliabilityOutOfRange { .. }));
    }

    #[test]
    fn stats_health_flips_at_half_failures() {
        let mut stats = ProviderStats::default();
        assert!(stats.is_healthy());

        stats.requests = 10;
        stats.successes = 6;
        stats.failures = 4;
        assert!(stats.is_healthy());

        stats.failures = 5;
        stats.successes = 5;
        assert!(!stats.is_healthy());
    }
}
