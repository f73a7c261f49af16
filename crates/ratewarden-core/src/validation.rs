//! Rate validation and anomaly detection.
//!
//! Sits between consolidation and the cache. Hard errors discard a quote;
//! warnings flag it but let it through; the anomaly detector scores each
//! observation against a rolling per-pair history and raises an alert when a
//! quote is statistically far from recent behavior. The arbitrage scan is
//! informational only and never blocks ingestion.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{ConsolidatedRate, CurrencyCode, PairSymbol, RawQuote, ValidationResult};

const ALERT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Warning threshold for deviation from the last accepted rate.
    pub max_deviation_percent: f64,
    /// Warning threshold for quote staleness.
    pub max_age: Duration,
    /// Warning threshold for consolidated quality.
    pub min_quality_score: f64,
    /// Anomaly score at or above which an alert is broadcast.
    pub anomaly_alert_cutoff: f64,
    /// Triangular product deviation, in percent, treated as an arbitrage hit.
    pub arbitrage_tolerance_percent: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_deviation_percent: 10.0,
            max_age: Duration::from_secs(300),
            min_quality_score: 70.0,
            anomaly_alert_cutoff: 0.6,
            arbitrage_tolerance_percent: 0.5,
        }
    }
}

/// Rolling z-score detector with a bounded per-pair history.
pub struct AnomalyDetector {
    window: usize,
    min_points: usize,
    history: Mutex<HashMap<PairSymbol, VecDeque<f64>>>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(100, 10)
    }
}

impl AnomalyDetector {
    pub fn new(window: usize, min_points: usize) -> Self {
        Self {
            window: window.max(1),
            min_points: min_points.max(2),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Score `rate` against the pair's history, then record it.
    ///
    /// Returns 0 until the window holds at least the minimum number of
    /// points; the observation is recorded either way.
    pub fn observe(&self, pair: &PairSymbol, rate: f64) -> f64 {
        let mut history = self
            .history
            .lock()
            .expect("anomaly history lock is not poisoned");
        let window = history.entry(pair.clone()).or_default();

        let score = if window.len() >= self.min_points {
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            let variance = window
                .iter()
                .map(|value| (value - mean).powi(2))
                .sum::<f64>()
                / window.len() as f64;
            let stddev = variance.sqrt();
            if stddev > f64::EPSILON {
                let z = (rate - mean).abs() / stddev;
                (z / 3.0).min(1.0)
            } else {
                0.0
            }
        } else {
            0.0
        };

        window.push_back(rate);
        while window.len() > self.window {
            window.pop_front();
        }

        score
    }

    pub fn history_len(&self, pair: &PairSymbol) -> usize {
        self.history
            .lock()
            .expect("anomaly history lock is not poisoned")
            .get(pair)
            .map_or(0, VecDeque::len)
    }
}

/// Broadcast when an observation's anomaly score crosses the alert cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub pair: PairSymbol,
    pub rate: f64,
    pub anomaly_score: f64,
}

/// Triangular inconsistency found across one cycle's consolidated rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    /// The three currencies forming the loop.
    pub loop_currencies: [CurrencyCode; 3],
    /// Product of the three legs; 1.0 means perfectly consistent.
    pub loop_product: f64,
    pub deviation_percent: f64,
}

pub struct RateValidationEngine {
    config: ValidationConfig,
    detector: AnomalyDetector,
    last_accepted: Mutex<HashMap<PairSymbol, f64>>,
    alerts: broadcast::Sender<AnomalyAlert>,
}

impl Default for RateValidationEngine {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl RateValidationEngine {
    pub fn new(config: ValidationConfig) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            config,
            detector: AnomalyDetector::default(),
            last_accepted: Mutex::new(HashMap::new()),
            alerts,
        }
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AnomalyAlert> {
        self.alerts.subscribe()
    }

    /// Validate a consolidated rate before it reaches the cache.
    pub fn validate_consolidated(&self, rate: &ConsolidatedRate) -> ValidationResult {
        let mut result = self.validate_rate_value(
            &rate.pair,
            rate.rate,
            rate.timestamp.age(),
            rate.quality_score,
        );
        if result.is_valid && rate.quality_score < self.config.min_quality_score {
            result.warnings.push(format!(
                "quality score {:.1} is below the minimum {:.1}",
                rate.quality_score, self.config.min_quality_score
            ));
        }
        result
    }

    /// Validate an individual streaming tick.
    pub fn validate_stream_quote(&self, quote: &RawQuote) -> ValidationResult {
        self.validate_rate_value(
            &quote.pair,
            quote.rate,
            quote.timestamp.age(),
            crate::consolidator::SINGLE_SOURCE_QUALITY,
        )
    }

    fn validate_rate_value(
        &self,
        pair: &PairSymbol,
        rate: f64,
        age: Duration,
        quality_score: f64,
    ) -> ValidationResult {
        if !rate.is_finite() || rate <= 0.0 {
            return ValidationResult::rejected(
                0.0,
                vec![format!("rate {rate} is missing, zero, or negative")],
            );
        }

        let mut warnings = Vec::new();

        {
            let mut last_accepted = self
                .last_accepted
                .lock()
                .expect("last accepted rate lock is not poisoned");
            if let Some(previous) = last_accepted.get(pair) {
                let deviation = (rate - previous).abs() / previous * 100.0;
                if deviation > self.config.max_deviation_percent {
                    warnings.push(format!(
                        "rate deviates {deviation:.2}% from last accepted {previous}"
                    ));
                }
            }
            last_accepted.insert(pair.clone(), rate);
        }

        if age > self.config.max_age {
            warnings.push(format!(
                "data is {}s old, freshness limit is {}s",
                age.as_secs(),
                self.config.max_age.as_secs()
            ));
        }

        let anomaly_score = self.detector.observe(pair, rate);
        if anomaly_score >= self.config.anomaly_alert_cutoff {
            // Best effort; nobody listening is fine.
            let _ = self.alerts.send(AnomalyAlert {
                pair: pair.clone(),
                rate,
                anomaly_score,
            });
        }

        ValidationResult {
            is_valid: true,
            quality_score,
            anomaly_score,
            warnings,
            errors: Vec::new(),
        }
    }

    /// Scan one cycle's consolidated rates for triangular inconsistencies.
    ///
    /// For every currency triple with all three legs resolvable (directly or
    /// by inversion), the loop product `A→B × B→C × C→A` should be 1.
    pub fn check_arbitrage(&self, rates: &[ConsolidatedRate]) -> Vec<ArbitrageOpportunity> {
        let mut quoted: HashMap<(CurrencyCode, CurrencyCode), f64> = HashMap::new();
        let mut currencies: BTreeSet<CurrencyCode> = BTreeSet::new();
        for rate in rates {
            if rate.rate <= 0.0 {
                continue;
            }
            quoted.insert(
                (rate.pair.base().clone(), rate.pair.quote().clone()),
                rate.rate,
            );
            currencies.insert(rate.pair.base().clone());
            currencies.insert(rate.pair.quote().clone());
        }

        let leg = |from: &CurrencyCode, to: &CurrencyCode| -> Option<f64> {
            quoted
                .get(&(from.clone(), to.clone()))
                .copied()
                .or_else(|| quoted.get(&(to.clone(), from.clone())).map(|rate| 1.0 / rate))
        };

        let ordered: Vec<CurrencyCode> = currencies.into_iter().collect();
        let mut opportunities = Vec::new();
        for i in 0..ordered.len() {
            for j in (i + 1)..ordered.len() {
                for k in (j + 1)..ordered.len() {
                    let (a, b, c) = (&ordered[i], &ordered[j], &ordered[k]);
                    let (Some(ab), Some(bc), Some(ca)) = (leg(a, b), leg(b, c), leg(c, a)) else {
                        continue;
                    };
                    let loop_product = ab * bc * ca;
                    let deviation_percent = (loop_product - 1.0).abs() * 100.0;
                    if deviation_percent > self.config.arbitrage_tolerance_percent {
                        opportunities.push(ArbitrageOpportunity {
                            loop_currencies: [a.clone(), b.clone(), c.clone()],
                            loop_product,
                            deviation_percent,
                        });
                    }
                }
            }
        }
        opportunities
    }
}
