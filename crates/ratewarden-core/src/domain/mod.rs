//! # Domain Models
//!
//! Canonical currency and rate types shared by every component.
//!
//! All models validate their invariants at construction time and carry full
//! serde support so they can flow to the durable store and the message bus
//! unchanged.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CurrencyCode`] | Validated ISO 4217 alphabetic code |
//! | [`PairSymbol`] | Directed `"BASE/QUOTE"` pair key |
//! | [`CurrencyDefinition`] | Registry catalog entry |
//! | [`CurrencyPair`] | Tradeable pair parameters |
//! | [`RawQuote`] | Normalized single-provider quote |
//! | [`ConsolidatedRate`] | Weighted, quality-scored cycle result |
//! | [`ValidationResult`] | Per-quote validation outcome |
//! | [`ProviderStats`] | Cumulative provider health counters |
//! | [`UtcDateTime`] | UTC timestamp |

mod currency;
mod models;
mod timestamp;

pub use currency::{
    CurrencyCategory, CurrencyCode, CurrencyDefinition, CurrencyPair, PairSymbol, TradingHours,
};
pub use models::{ConsolidatedRate, ProviderStats, RateProvenance, RawQuote, ValidationResult};
pub use timestamp::UtcDateTime;
