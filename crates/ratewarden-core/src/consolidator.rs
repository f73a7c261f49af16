//! Rate consolidation.
//!
//! Merges one ingestion cycle's quotes per pair into a single
//! reliability-weighted rate with a 0..=100 quality score. The score shape
//! (linear dispersion penalty, additive bid/ask and trust bonuses, clamp) is
//! load-bearing for downstream consumers; change the numbers, not the shape.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{ConsolidatedRate, PairSymbol, RawQuote, UtcDateTime};

/// Quality assigned when only one provider reported a pair and no
/// cross-check is possible. Streaming ticks reuse this value.
pub const SINGLE_SOURCE_QUALITY: f64 = 85.0;

const BID_ASK_BONUS: f64 = 10.0;
const TRUST_BONUS_BASELINE: f64 = 0.8;
const TRUST_BONUS_SCALE: f64 = 50.0;
const SPREAD_PENALTY_PER_PERCENT: f64 = 10.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsolidationError {
    #[error("no quotes to consolidate")]
    NoQuotes,
    #[error("quotes span multiple pairs: {first} and {second}")]
    MixedPairs {
        first: PairSymbol,
        second: PairSymbol,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateConsolidator;

impl RateConsolidator {
    /// Consolidate every pair present in one cycle's harvest.
    ///
    /// Quotes are grouped by pair first; a pair with a single quote is
    /// accepted as-is at [`SINGLE_SOURCE_QUALITY`]. Output order is
    /// deterministic (sorted by pair symbol).
    pub fn consolidate_cycle(&self, quotes: Vec<RawQuote>) -> Vec<ConsolidatedRate> {
        let mut by_pair: BTreeMap<String, Vec<RawQuote>> = BTreeMap::new();
        for quote in quotes {
            by_pair.entry(quote.pair.to_string()).or_default().push(quote);
        }
        by_pair
            .into_values()
            .filter_map(|group| self.consolidate_pair(group).ok())
            .collect()
    }

    /// Consolidate the quotes for exactly one pair.
    pub fn consolidate_pair(
        &self,
        quotes: Vec<RawQuote>,
    ) -> Result<ConsolidatedRate, ConsolidationError> {
        let first = quotes.first().ok_or(ConsolidationError::NoQuotes)?;
        if let Some(stray) = quotes.iter().find(|quote| quote.pair != first.pair) {
            return Err(ConsolidationError::MixedPairs {
                first: first.pair.clone(),
                second: stray.pair.clone(),
            });
        }

        if quotes.len() == 1 {
            let quote = &quotes[0];
            let bid_ask_spread = spread_of(quote.bid, quote.ask);
            return Ok(ConsolidatedRate {
                pair: quote.pair.clone(),
                rate: quote.rate,
                bid: quote.bid,
                ask: quote.ask,
                bid_ask_spread,
                rate_spread_percent: 0.0,
                quality_score: SINGLE_SOURCE_QUALITY,
                provider_count: 1,
                providers: vec![quote.provider.clone()],
                timestamp: UtcDateTime::now(),
                raw_rates: quotes,
            });
        }

        let rate = weighted_mean(quotes.iter().map(|q| (q.rate, q.reliability)))
            .unwrap_or(first.rate);
        let bid = weighted_mean(
            quotes
                .iter()
                .filter_map(|q| q.bid.map(|bid| (bid, q.reliability))),
        );
        let ask = weighted_mean(
            quotes
                .iter()
                .filter_map(|q| q.ask.map(|ask| (ask, q.reliability))),
        );
        let bid_ask_spread = spread_of(bid, ask);

        let min_rate = quotes.iter().map(|q| q.rate).fold(f64::INFINITY, f64::min);
        let max_rate = quotes
            .iter()
            .map(|q| q.rate)
            .fold(f64::NEG_INFINITY, f64::max);
        let rate_spread_percent = if rate.abs() > f64::EPSILON {
            (max_rate - min_rate) / rate * 100.0
        } else {
            0.0
        };

        let avg_reliability =
            quotes.iter().map(|q| q.reliability).sum::<f64>() / quotes.len() as f64;

        let mut quality_score =
            (100.0 - rate_spread_percent * SPREAD_PENALTY_PER_PERCENT).clamp(0.0, 100.0);
        if bid.is_some() && ask.is_some() {
            quality_score += BID_ASK_BONUS;
        }
        quality_score +=
            ((avg_reliability - TRUST_BONUS_BASELINE) * TRUST_BONUS_SCALE).min(100.0);
        let quality_score = quality_score.clamp(0.0, 100.0);

        let mut providers = Vec::new();
        for quote in &quotes {
            if !providers.contains(&quote.provider) {
                providers.push(quote.provider.clone());
            }
        }

        Ok(ConsolidatedRate {
            pair: first.pair.clone(),
            rate,
            bid,
            ask,
            bid_ask_spread,
            rate_spread_percent,
            quality_score,
            provider_count: providers.len(),
            providers,
            timestamp: UtcDateTime::now(),
            raw_rates: quotes,
        })
    }
}

fn weighted_mean(values: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (value, weight) in values {
        weighted_sum += value * weight;
        weight_total += weight;
    }
    if weight_total > 0.0 {
        Some(weighted_sum / weight_total)
    } else {
        None
    }
}

fn spread_of(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    match (bid, ask) {
        (Some(bid), Some(ask)) => Some(ask - bid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CurrencyCode, ProviderId};

    fn pair() -> PairSymbol {
        PairSymbol::new(
            CurrencyCode::parse("USD").expect("code"),
            CurrencyCode::parse("EUR").expect("code"),
        )
        .expect("pair")
    }

    fn quote(provider: &str, rate: f64, reliability: f64) -> RawQuote {
        RawQuote::new(
            ProviderId::new(provider),
            pair(),
            rate,
            None,
            None,
            UtcDateTime::now(),
            reliability,
        )
        .expect("quote")
    }

    #[test]
    fn single_quote_keeps_rate_and_fixed_quality() {
        let consolidator = RateConsolidator;
        let result = consolidator
            .consolidate_pair(vec![quote("openrates", 0.92, 0.85)])
            .expect("single quote");

        assert_eq!(result.rate, 0.92);
        assert_eq!(result.quality_score, SINGLE_SOURCE_QUALITY);
        assert_eq!(result.provider_count, 1);
        assert_eq!(result.rate_spread_percent, 0.0);
    }

    #[test]
    fn identical_quotes_score_at_the_cap() {
        let consolidator = RateConsolidator;
        let result = consolidator
            .consolidate_pair(vec![
                quote("a", 0.92, 0.9),
                quote("b", 0.92, 0.9),
                quote("c", 0.92, 0.9),
            ])
            .expect("consolidation");

        assert_eq!(result.rate, 0.92);
        assert_eq!(result.rate_spread_percent, 0.0);
        assert!(result.quality_score >= 99.0);
    }

    #[test]
    fn equal_reliability_gives_arithmetic_mean() {
        // base=USD, three providers at 0.9 reporting 0.92/0.93/0.925.
        let consolidator = RateConsolidator;
        let result = consolidator
            .consolidate_pair(vec![
                quote("a", 0.92, 0.9),
                quote("b", 0.93, 0.9),
                quote("c", 0.925, 0.9),
            ])
            .expect("consolidation");

        assert!((result.rate - 0.925).abs() < 1e-9);
        assert!(result.quality_score > 90.0);
    }

    #[test]
    fn outlier_widens_spread_and_lowers_quality() {
        let consolidator = RateConsolidator;
        let agreed = consolidator
            .consolidate_pair(vec![quote("a", 0.92, 0.9), quote("b", 0.92, 0.9)])
            .expect("agreeing quotes");
        let disputed = consolidator
            .consolidate_pair(vec![quote("a", 0.92, 0.9), quote("b", 1.84, 0.9)])
            .expect("outlier quote");

        assert!(disputed.rate_spread_percent > agreed.rate_spread_percent);
        assert!(disputed.quality_score < agreed.quality_score);
    }

    #[test]
    fn bid_ask_mean_ignores_quotes_without_them() {
        let consolidator = RateConsolidator;
        let mut with_book = quote("a", 0.92, 0.9);
        with_book.bid = Some(0.9195);
        with_book.ask = Some(0.9205);

        let result = consolidator
            .consolidate_pair(vec![with_book, quote("b", 0.92, 0.9)])
            .expect("consolidation");

        assert_eq!(result.bid, Some(0.9195));
        assert_eq!(result.ask, Some(0.9205));
        assert!((result.bid_ask_spread.expect("spread") - 0.001).abs() < 1e-9);
    }

    #[test]
    fn higher_reliability_pulls_the_mean() {
        let consolidator = RateConsolidator;
        let result = consolidator
            .consolidate_pair(vec![quote("a", 0.90, 0.95), quote("b", 1.00, 0.05)])
            .expect("consolidation");

        assert!(result.rate < 0.92);
    }

    #[test]
    fn mixed_pairs_are_rejected() {
        let consolidator = RateConsolidator;
        let other = RawQuote::new(
            ProviderId::new("a"),
            PairSymbol::parse("GBP/USD").expect("pair"),
            1.27,
            None,
            None,
            UtcDateTime::now(),
            0.9,
        )
        .expect("quote");

        let err = consolidator
            .consolidate_pair(vec![quote("a", 0.92, 0.9), other])
            .expect_err("must reject");
        assert!(matches!(err, ConsolidationError::MixedPairs { .. }));
    }

    #[test]
    fn cycle_groups_by_pair() {
        let consolidator = RateConsolidator;
        let gbp = RawQuote::new(
            ProviderId::new("a"),
            PairSymbol::parse("USD/GBP").expect("pair"),
            0.79,
            None,
            None,
            UtcDateTime::now(),
            0.9,
        )
        .expect("quote");

        let rates =
            consolidator.consolidate_cycle(vec![quote("a", 0.92, 0.9), quote("b", 0.93, 0.9), gbp]);

        assert_eq!(rates.len(), 2);
        let eur = rates
            .iter()
            .find(|rate| rate.pair.to_string() == "USD/EUR")
            .expect("eur rate");
        assert_eq!(eur.provider_count, 2);
    }
}
