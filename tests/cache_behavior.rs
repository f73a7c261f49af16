use std::sync::Arc;

use ratewarden_core::{ConsolidatedRate, RateCache, RateConsolidator, RateProvenance};
use ratewarden_store::RateStore;
use ratewarden_tests::{code, quote};

fn consolidated(symbol: &str, rate: f64) -> ConsolidatedRate {
    RateConsolidator
        .consolidate_pair(vec![quote("test", symbol, rate, 0.9)])
        .expect("consolidation")
}

#[test]
fn lookup_falls_back_direct_then_inverse_then_cross() {
    let cache = RateCache::new(code("USD"));
    cache.put_consolidated(&consolidated("USD/EUR", 0.92));
    cache.put_consolidated(&consolidated("USD/GBP", 0.79));

    let direct = cache.get_rate(&code("USD"), &code("EUR")).expect("direct");
    assert_eq!(direct.provenance, RateProvenance::Direct);
    assert_eq!(direct.rate.rate, 0.92);

    let inverse = cache.get_rate(&code("EUR"), &code("USD")).expect("inverse");
    assert!(inverse.is_inverse());
    assert!((inverse.rate.rate - 1.0 / 0.92).abs() < 1e-9);

    let cross = cache.get_rate(&code("EUR"), &code("GBP")).expect("cross");
    assert!(cross.is_cross_rate());
    assert!((cross.rate.rate - 0.79 / 0.92).abs() < 1e-9);

    assert!(cache.get_rate(&code("EUR"), &code("JPY")).is_none());
}

#[test]
fn cross_rate_inherits_the_weaker_quality_and_older_timestamp() {
    let cache = RateCache::new(code("USD"));

    let mut eur_leg = consolidated("USD/EUR", 0.92);
    eur_leg.quality_score = 95.0;
    let mut gbp_leg = consolidated("USD/GBP", 0.79);
    gbp_leg.quality_score = 72.0;
    let older = eur_leg.timestamp.earliest(gbp_leg.timestamp);

    cache.put_consolidated(&eur_leg);
    cache.put_consolidated(&gbp_leg);

    let cross = cache.get_rate(&code("EUR"), &code("GBP")).expect("cross");
    assert_eq!(cross.rate.quality_score, 72.0);
    assert_eq!(cross.rate.timestamp, older);
}

#[test]
fn durable_tier_shares_rates_across_cache_instances() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rates.duckdb");

    {
        let store = Arc::new(RateStore::open(&path).expect("store"));
        let cache = RateCache::with_durable_store(code("USD"), store);
        cache.put_consolidated(&consolidated("USD/EUR", 0.92));
    }

    // A fresh process opens the same file and sees the rate.
    let store = Arc::new(RateStore::open(&path).expect("reopen"));
    let cache = RateCache::with_durable_store(code("USD"), store);

    let hit = cache.get_rate(&code("USD"), &code("EUR")).expect("hit");
    assert_eq!(hit.provenance, RateProvenance::Direct);
    assert_eq!(hit.rate.rate, 0.92);
}

#[test]
fn durable_payload_is_the_full_consolidated_shape() {
    let store = Arc::new(RateStore::open_in_memory().expect("store"));
    let cache = RateCache::with_durable_store(code("USD"), Arc::clone(&store));
    let written = consolidated("USD/EUR", 0.92);
    cache.put_consolidated(&written);

    let row = store.get("USD/EUR").expect("get").expect("row");
    let parsed: ConsolidatedRate = serde_json::from_str(&row.payload).expect("payload parses");
    assert_eq!(parsed, written);
    assert_eq!(row.quality_score, written.quality_score);
}

#[test]
fn latest_rates_returns_live_entries_sorted_and_filtered() {
    let cache = RateCache::new(code("USD"));
    cache.put_consolidated(&consolidated("USD/JPY", 155.2));
    cache.put_consolidated(&consolidated("USD/EUR", 0.92));
    cache.put_consolidated(&consolidated("USD/GBP", 0.79));

    let all = cache.get_latest_rates(None);
    let symbols: Vec<String> = all.iter().map(|rate| rate.pair.to_string()).collect();
    assert_eq!(symbols, vec!["USD/EUR", "USD/GBP", "USD/JPY"]);

    let jpy = cache.get_latest_rates(Some(&[code("JPY")]));
    assert_eq!(jpy.len(), 1);
    assert_eq!(jpy[0].pair.to_string(), "USD/JPY");
}

#[test]
fn health_reports_both_tiers() {
    let store = Arc::new(RateStore::open_in_memory().expect("store"));
    let cache = RateCache::with_durable_store(code("USD"), store);
    cache.put_consolidated(&consolidated("USD/EUR", 0.92));

    let health = cache.health();
    assert_eq!(health.local_entries, 1);
    assert!(health.durable_tier_configured);
    assert!(health.durable_tier_available);

    let local_only = RateCache::new(code("USD"));
    let health = local_only.health();
    assert!(!health.durable_tier_configured);
    assert!(!health.durable_tier_available);
}
