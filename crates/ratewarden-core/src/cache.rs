//! Two-tier rate cache.
//!
//! Tier one is an in-process map read on the hot path; tier two is the
//! optional durable store shared across workers and restarts. Every write
//! lands in both tiers; a durable-tier failure is logged and degrades
//! durability only, never freshness. Lookups fall back direct → inverse →
//! cross-via-base before reporting a miss.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ratewarden_store::RateStore;
use serde::{Deserialize, Serialize};

use crate::{ConsolidatedRate, CurrencyCode, PairSymbol, RateProvenance, UtcDateTime};

/// How long a streaming tick stays readable before the next full cycle must
/// refresh it. Consolidated snapshots have no expiry; each cycle replaces
/// them wholesale.
pub const STREAM_TICK_TTL: Duration = Duration::from_secs(60);

/// A cache hit plus how it was resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLookup {
    pub rate: ConsolidatedRate,
    pub provenance: RateProvenance,
}

impl RateLookup {
    pub fn is_inverse(&self) -> bool {
        self.provenance == RateProvenance::Inverse
    }

    pub fn is_cross_rate(&self) -> bool {
        self.provenance == RateProvenance::Cross
    }
}

/// Operational snapshot for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub local_entries: usize,
    pub durable_tier_configured: bool,
    pub durable_tier_available: bool,
}

struct CachedEntry {
    rate: ConsolidatedRate,
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= Instant::now())
    }
}

pub struct RateCache {
    base_currency: CurrencyCode,
    local: RwLock<HashMap<PairSymbol, CachedEntry>>,
    durable: Option<Arc<RateStore>>,
}

impl RateCache {
    /// In-process tier only.
    pub fn new(base_currency: CurrencyCode) -> Self {
        Self {
            base_currency,
            local: RwLock::new(HashMap::new()),
            durable: None,
        }
    }

    /// Both tiers. The durable store may be shared with sibling workers.
    pub fn with_durable_store(base_currency: CurrencyCode, store: Arc<RateStore>) -> Self {
        Self {
            base_currency,
            local: RwLock::new(HashMap::new()),
            durable: Some(store),
        }
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    /// Store one cycle's consolidated rate. No expiry; the next cycle's
    /// write supersedes it.
    pub fn put_consolidated(&self, rate: &ConsolidatedRate) {
        self.put(rate, None);
    }

    /// Store an accepted streaming tick with a short lifetime.
    pub fn put_stream_tick(&self, rate: &ConsolidatedRate) {
        self.put(rate, Some(STREAM_TICK_TTL));
    }

    fn put(&self, rate: &ConsolidatedRate, ttl: Option<Duration>) {
        {
            let mut local = self.local.write().expect("local cache lock is not poisoned");
            local.insert(
                rate.pair.clone(),
                CachedEntry {
                    rate: rate.clone(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }

        if let Some(store) = &self.durable {
            let payload = match serde_json::to_string(rate) {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!(pair = %rate.pair, %error, "rate payload failed to serialize");
                    return;
                }
            };
            if let Err(error) =
                store.put(&rate.pair.to_string(), &payload, rate.quality_score, ttl)
            {
                tracing::warn!(
                    pair = %rate.pair,
                    %error,
                    "durable tier write failed; continuing on the local tier"
                );
            }
        }
    }

    /// Resolve a rate for `from -> to`.
    ///
    /// | Attempt | Result |
    /// |---------|--------|
    /// | direct hit | cached rate as-is |
    /// | inverse hit | `1/rate`, bid and ask swapped and inverted |
    /// | both base legs | `rate(base,to) / rate(base,from)`, min quality |
    /// | none | `None`; the caller owns any historical fallback |
    pub fn get_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Option<RateLookup> {
        let direct = PairSymbol::new(from.clone(), to.clone()).ok()?;
        if let Some(rate) = self.entry(&direct) {
            return Some(RateLookup {
                rate,
                provenance: RateProvenance::Direct,
            });
        }

        if let Some(stored) = self.entry(&direct.inverse()) {
            return Some(RateLookup {
                rate: invert(&stored, direct),
                provenance: RateProvenance::Inverse,
            });
        }

        if *from != self.base_currency && *to != self.base_currency {
            let from_leg = PairSymbol::new(self.base_currency.clone(), from.clone()).ok()?;
            let to_leg = PairSymbol::new(self.base_currency.clone(), to.clone()).ok()?;
            if let (Some(from_rate), Some(to_rate)) = (self.entry(&from_leg), self.entry(&to_leg)) {
                return cross(&from_rate, &to_rate, direct).map(|rate| RateLookup {
                    rate,
                    provenance: RateProvenance::Cross,
                });
            }
        }

        None
    }

    /// Every live consolidated rate, optionally filtered to pairs touching
    /// the given currencies.
    pub fn get_latest_rates(&self, currencies: Option<&[CurrencyCode]>) -> Vec<ConsolidatedRate> {
        let local = self.local.read().expect("local cache lock is not poisoned");
        let mut rates: Vec<ConsolidatedRate> = local
            .values()
            .filter(|entry| !entry.is_expired())
            .filter(|entry| match currencies {
                Some(wanted) => {
                    wanted.contains(entry.rate.pair.base())
                        || wanted.contains(entry.rate.pair.quote())
                }
                None => true,
            })
            .map(|entry| entry.rate.clone())
            .collect();
        rates.sort_by(|a, b| a.pair.to_string().cmp(&b.pair.to_string()));
        rates
    }

    /// Drop expired local entries. The durable tier purges independently.
    pub fn purge_expired(&self) -> usize {
        let mut local = self.local.write().expect("local cache lock is not poisoned");
        let before = local.len();
        local.retain(|_, entry| !entry.is_expired());
        before - local.len()
    }

    pub fn health(&self) -> CacheHealth {
        let local_entries = {
            let local = self.local.read().expect("local cache lock is not poisoned");
            local.values().filter(|entry| !entry.is_expired()).count()
        };
        let durable_tier_available = match &self.durable {
            Some(store) => store.ping().is_ok(),
            None => false,
        };
        CacheHealth {
            local_entries,
            durable_tier_configured: self.durable.is_some(),
            durable_tier_available,
        }
    }

    /// Direct entry lookup: local tier first, then the durable tier, warming
    /// the local tier on a durable hit so sibling workers' writes become
    /// visible here.
    fn entry(&self, pair: &PairSymbol) -> Option<ConsolidatedRate> {
        {
            let local = self.local.read().expect("local cache lock is not poisoned");
            if let Some(entry) = local.get(pair) {
                if !entry.is_expired() {
                    return Some(entry.rate.clone());
                }
            }
        }

        let store = self.durable.as_ref()?;
        let stored = match store.get(&pair.to_string()) {
            Ok(stored) => stored?,
            Err(error) => {
                tracing::warn!(pair = %pair, %error, "durable tier read failed");
                return None;
            }
        };
        let rate: ConsolidatedRate = match serde_json::from_str(&stored.payload) {
            Ok(rate) => rate,
            Err(error) => {
                tracing::warn!(pair = %pair, %error, "durable tier payload did not parse");
                return None;
            }
        };

        let mut local = self.local.write().expect("local cache lock is not poisoned");
        local.insert(
            pair.clone(),
            CachedEntry {
                rate: rate.clone(),
                expires_at: None,
            },
        );
        Some(rate)
    }
}

fn invert(stored: &ConsolidatedRate, pair: PairSymbol) -> ConsolidatedRate {
    let bid = stored.ask.map(|ask| 1.0 / ask);
    let ask = stored.bid.map(|bid| 1.0 / bid);
    let bid_ask_spread = match (bid, ask) {
        (Some(bid), Some(ask)) => Some(ask - bid),
        _ => None,
    };
    ConsolidatedRate {
        pair,
        rate: 1.0 / stored.rate,
        bid,
        ask,
        bid_ask_spread,
        rate_spread_percent: stored.rate_spread_percent,
        quality_score: stored.quality_score,
        provider_count: stored.provider_count,
        providers: stored.providers.clone(),
        timestamp: stored.timestamp,
        raw_rates: stored.raw_rates.clone(),
    }
}

fn cross(
    from_leg: &ConsolidatedRate,
    to_leg: &ConsolidatedRate,
    pair: PairSymbol,
) -> Option<ConsolidatedRate> {
    if from_leg.rate == 0.0 {
        return None;
    }
    let mut providers = from_leg.providers.clone();
    for provider in &to_leg.providers {
        if !providers.contains(provider) {
            providers.push(provider.clone());
        }
    }
    Some(ConsolidatedRate {
        pair,
        rate: to_leg.rate / from_leg.rate,
        bid: None,
        ask: None,
        bid_ask_spread: None,
        rate_spread_percent: from_leg.rate_spread_percent.max(to_leg.rate_spread_percent),
        quality_score: from_leg.quality_score.min(to_leg.quality_score),
        provider_count: providers.len(),
        providers,
        timestamp: UtcDateTime::earliest(from_leg.timestamp, to_leg.timestamp),
        raw_rates: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProviderId, RawQuote};

    fn code(raw: &str) -> CurrencyCode {
        CurrencyCode::parse(raw).expect("code")
    }

    fn consolidated(symbol: &str, rate: f64, quality: f64) -> ConsolidatedRate {
        let pair = PairSymbol::parse(symbol).expect("pair");
        let quote = RawQuote::new(
            ProviderId::new("test"),
            pair.clone(),
            rate,
            None,
            None,
            UtcDateTime::now(),
            0.9,
        )
        .expect("quote");
        ConsolidatedRate {
            quality_score: quality,
            ..ConsolidatedRate::from_stream_tick(&quote)
        }
    }

    #[test]
    fn direct_hit_wins() {
        let cache = RateCache::new(code("USD"));
        cache.put_consolidated(&consolidated("EUR/USD", 1.09, 90.0));

        let hit = cache.get_rate(&code("EUR"), &code("USD")).expect("hit");
        assert_eq!(hit.provenance, RateProvenance::Direct);
        assert_eq!(hit.rate.rate, 1.09);
    }

    #[test]
    fn inverse_fallback_inverts_rate_and_swaps_book() {
        let cache = RateCache::new(code("USD"));
        let mut stored = consolidated("EUR/USD", 1.25, 90.0);
        stored.bid = Some(1.24);
        stored.ask = Some(1.26);
        cache.put_consolidated(&stored);

        let hit = cache.get_rate(&code("USD"), &code("EUR")).expect("hit");
        assert!(hit.is_inverse());
        assert!((hit.rate.rate - 0.8).abs() < 1e-9);
        assert!((hit.rate.bid.expect("bid") - 1.0 / 1.26).abs() < 1e-9);
        assert!((hit.rate.ask.expect("ask") - 1.0 / 1.24).abs() < 1e-9);
    }

    #[test]
    fn cross_fallback_bridges_through_base() {
        let cache = RateCache::new(code("USD"));
        cache.put_consolidated(&consolidated("USD/EUR", 0.92, 95.0));
        cache.put_consolidated(&consolidated("USD/GBP", 0.79, 88.0));

        let hit = cache.get_rate(&code("EUR"), &code("GBP")).expect("hit");
        assert!(hit.is_cross_rate());
        assert!((hit.rate.rate - 0.79 / 0.92).abs() < 1e-9);
        assert_eq!(hit.rate.quality_score, 88.0);
    }

    #[test]
    fn unresolvable_pair_is_a_clean_miss() {
        let cache = RateCache::new(code("USD"));
        cache.put_consolidated(&consolidated("USD/EUR", 0.92, 95.0));

        assert!(cache.get_rate(&code("EUR"), &code("JPY")).is_none());
        assert!(cache.get_rate(&code("EUR"), &code("EUR")).is_none());
    }

    #[test]
    fn latest_rates_filters_by_currency() {
        let cache = RateCache::new(code("USD"));
        cache.put_consolidated(&consolidated("USD/EUR", 0.92, 95.0));
        cache.put_consolidated(&consolidated("USD/GBP", 0.79, 88.0));
        cache.put_consolidated(&consolidated("USD/JPY", 155.2, 91.0));

        let all = cache.get_latest_rates(None);
        assert_eq!(all.len(), 3);

        let eur_only = cache.get_latest_rates(Some(&[code("EUR")]));
        assert_eq!(eur_only.len(), 1);
        assert_eq!(eur_only[0].pair.to_string(), "USD/EUR");
    }

    #[test]
    fn durable_tier_survives_a_new_local_tier() {
        let store = Arc::new(RateStore::open_in_memory().expect("store"));
        let writer = RateCache::with_durable_store(code("USD"), Arc::clone(&store));
        writer.put_consolidated(&consolidated("EUR/USD", 1.09, 90.0));

        // Fresh cache over the same store, as after a worker restart.
        let reader = RateCache::with_durable_store(code("USD"), store);
        let hit = reader.get_rate(&code("EUR"), &code("USD")).expect("hit");
        assert_eq!(hit.provenance, RateProvenance::Direct);
        assert_eq!(hit.rate.rate, 1.09);
    }

    #[test]
    fn expired_stream_ticks_purge_from_the_local_tier() {
        let cache = RateCache::new(code("USD"));
        cache.put_stream_tick(&consolidated("EUR/USD", 1.09, 85.0));
        assert_eq!(cache.health().local_entries, 1);

        {
            let mut local = cache.local.write().expect("lock");
            local
                .get_mut(&PairSymbol::parse("EUR/USD").expect("pair"))
                .expect("entry")
                .expires_at = Some(Instant::now() - Duration::from_secs(1));
        }

        assert!(cache.get_rate(&code("EUR"), &code("USD")).is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.health().local_entries, 0);
    }
}
