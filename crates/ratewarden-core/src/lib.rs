//! # Ratewarden Core
//!
//! Multi-provider FX rate ingestion and consolidation.
//!
//! ## Overview
//!
//! This crate pulls exchange rates from independent, unreliable external
//! providers, reconciles them into one trustworthy rate per currency pair,
//! and serves the result with low latency:
//!
//! - **Currency registry** with a symmetric pair catalog, amount/precision
//!   validation, and regional restrictions
//! - **Provider adapters** normalizing heterogeneous wire formats into one
//!   quote type, each with its own circuit breaker and request budget
//! - **Consolidator** producing reliability-weighted, quality-scored rates
//! - **Validation engine** with rolling-history anomaly detection and a
//!   triangular arbitrage scan
//! - **Two-tier cache** (in-process + shared durable) with direct, inverse,
//!   and cross-rate lookup
//! - **Orchestrator** driving polling cycles and streaming connections under
//!   a consecutive-failure circuit breaker
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (OpenRates, FxGateway, PulseFX) |
//! | [`cache`] | Two-tier rate cache with fallback lookup |
//! | [`circuit_breaker`] | Per-provider circuit breaker |
//! | [`consolidator`] | Weighted consolidation and quality scoring |
//! | [`domain`] | Domain models (currencies, pairs, quotes, rates) |
//! | [`error`] | Field-specific validation errors |
//! | [`http_client`] | HTTP client abstraction |
//! | [`orchestrator`] | Ingestion lifecycle and failure policy |
//! | [`publisher`] | Best-effort rate event fan-out |
//! | [`rate_source`] | Rate source trait and request/response types |
//! | [`registry`] | Currency and pair registry |
//! | [`source`] | Provider identifiers |
//! | [`stream_transport`] | Websocket transport abstraction |
//! | [`throttling`] | Request budgets |
//! | [`validation`] | Validation engine and anomaly detection |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratewarden_core::{
//!     CurrencyCode, CurrencyRegistry, IngestionOrchestrator, OrchestratorConfig,
//!     OpenRatesAdapter, FxGatewayAdapter, RateBus, RateCache, RateSource,
//!     RateValidationEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let base = CurrencyCode::parse("USD")?;
//!     let registry = Arc::new(CurrencyRegistry::with_major_currencies(&base)?);
//!     let cache = Arc::new(RateCache::new(base.clone()));
//!     let bus = Arc::new(RateBus::default());
//!
//!     let sources: Vec<Arc<dyn RateSource>> = vec![
//!         Arc::new(OpenRatesAdapter::default()),
//!         Arc::new(FxGatewayAdapter::default()),
//!     ];
//!     let orchestrator = IngestionOrchestrator::new(
//!         OrchestratorConfig::default(),
//!         registry,
//!         sources,
//!         Arc::new(RateValidationEngine::default()),
//!         Arc::clone(&cache),
//!         bus,
//!     );
//!     orchestrator.start().await?;
//!
//!     let eur = CurrencyCode::parse("EUR")?;
//!     if let Some(hit) = cache.get_rate(&base, &eur) {
//!         println!("USD/EUR = {:.4} (quality {:.0})", hit.rate.rate, hit.rate.quality_score);
//!     }
//!
//!     orchestrator.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  Orchestrator    │── timer ──┐
//! └───────┬──────────┘           │
//!         │ fan-out              ▼
//! ┌───────┴──────────┐   ┌──────────────────┐
//! │ Provider Adapters│   │ Stream Supervisors│
//! │ (RateSource)     │   │ (per provider)    │
//! └───────┬──────────┘   └────────┬─────────┘
//!         │ RawQuote               │ RawQuote
//!         ▼                        │
//! ┌──────────────────┐             │
//! │  Consolidator    │             │
//! └───────┬──────────┘             │
//!         ▼                        ▼
//! ┌──────────────────────────────────┐
//! │  Validation Engine (+ anomalies) │
//! └───────┬──────────────────┬───────┘
//!         ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐
//! │  Rate Cache  │   │   Rate Bus   │
//! │ (two tiers)  │   │ (fan-out)    │
//! └──────────────┘   └──────────────┘
//! ```

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod consolidator;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod orchestrator;
pub mod publisher;
pub mod rate_source;
pub mod registry;
pub mod source;
pub mod stream_transport;
pub mod throttling;
pub mod validation;

pub use adapters::{FxGatewayAdapter, OpenRatesAdapter, PulseFxAdapter};
pub use cache::{CacheHealth, RateCache, RateLookup, STREAM_TICK_TTL};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use consolidator::{ConsolidationError, RateConsolidator, SINGLE_SOURCE_QUALITY};
pub use domain::{
    ConsolidatedRate, CurrencyCategory, CurrencyCode, CurrencyDefinition, CurrencyPair, PairSymbol,
    ProviderStats, RateProvenance, RawQuote, TradingHours, UtcDateTime, ValidationResult,
};
pub use error::ValidationError;
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient};
pub use orchestrator::{
    IngestionOrchestrator, IngestionState, OrchestratorConfig, OrchestratorError,
    OrchestratorEvent, OrchestratorStatus, ProviderHealth,
};
pub use publisher::{RateBus, RateEvent, RatePayload};
pub use rate_source::{
    FetchRequest, ProviderStatsTracker, QuoteBatch, RateSource, RateStream, SourceError,
    SourceErrorKind, StreamRequest,
};
pub use registry::{
    AmountLimits, CurrencyRegistry, RegionalRestriction, RegistryError, RegistryEvent,
    RestrictionCheck,
};
pub use source::ProviderId;
pub use stream_transport::{ScriptedTransport, StreamTransport, WebSocketTransport};
pub use throttling::ThrottlingQueue;
pub use validation::{
    AnomalyAlert, AnomalyDetector, ArbitrageOpportunity, RateValidationEngine, ValidationConfig,
};
