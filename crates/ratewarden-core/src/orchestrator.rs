//! Ingestion orchestration.
//!
//! Drives the polling cycle, supervises streaming connections, and applies
//! the consecutive-failure circuit breaker. Lifecycle:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!                            \
//!                             -> Failed (operator restart required)
//! ```
//!
//! A cycle fans out to every provider concurrently and proceeds with whoever
//! answers in time; only zero responders is a hard failure. Streaming
//! connections run independently of the polling loop and reconnect with a
//! fixed delay while the orchestrator stays in `Running`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::cache::{CacheHealth, RateCache};
use crate::publisher::RateBus;
use crate::rate_source::{FetchRequest, RateSource, StreamRequest};
use crate::registry::CurrencyRegistry;
use crate::validation::{ArbitrageOpportunity, RateValidationEngine};
use crate::{ConsolidatedRate, CurrencyCode, PairSymbol, ProviderId, ProviderStats, RateConsolidator, RawQuote};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Per-provider budget inside one cycle; a slow provider forfeits the
    /// cycle, it never delays the others.
    pub fetch_timeout: Duration,
    /// Consecutive hard-failure cycles before the breaker trips.
    pub max_consecutive_failures: u32,
    pub stream_reconnect_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
            max_consecutive_failures: 5,
            stream_reconnect_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Breaker tripped; requires an explicit operator restart.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    Started,
    /// One completed cycle's accepted rates plus informational findings.
    RatesUpdated {
        rates: Vec<ConsolidatedRate>,
        arbitrage_opportunities: Vec<ArbitrageOpportunity>,
    },
    CycleFailed {
        consecutive_failures: u32,
    },
    /// Emitted exactly once when the breaker trips.
    CriticalFailure {
        consecutive_failures: u32,
    },
    Stopped,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("ingestion cannot start from the {state:?} state")]
    NotStartable { state: IngestionState },
}

/// Operational snapshot for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: IngestionState,
    pub consecutive_failures: u32,
    pub active_streams: usize,
    pub cache: CacheHealth,
    pub providers: Vec<ProviderHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub id: ProviderId,
    pub healthy: bool,
    pub success_percent: f64,
    pub stats: ProviderStats,
}

enum CycleOutcome {
    Completed,
    Failed,
    Critical,
}

pub struct IngestionOrchestrator {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    config: OrchestratorConfig,
    registry: Arc<CurrencyRegistry>,
    sources: Vec<Arc<dyn RateSource>>,
    consolidator: RateConsolidator,
    validator: Arc<RateValidationEngine>,
    cache: Arc<RateCache>,
    bus: Arc<RateBus>,
    state: Mutex<IngestionState>,
    consecutive_failures: AtomicU32,
    critical_emitted: AtomicBool,
    active_streams: AtomicUsize,
    shutdown: Mutex<watch::Sender<bool>>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl IngestionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<CurrencyRegistry>,
        sources: Vec<Arc<dyn RateSource>>,
        validator: Arc<RateValidationEngine>,
        cache: Arc<RateCache>,
        bus: Arc<RateBus>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                sources,
                consolidator: RateConsolidator,
                validator,
                cache,
                bus,
                state: Mutex::new(IngestionState::Stopped),
                consecutive_failures: AtomicU32::new(0),
                critical_emitted: AtomicBool::new(false),
                active_streams: AtomicUsize::new(0),
                shutdown: Mutex::new(shutdown),
                events,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> IngestionState {
        *self.inner.state.lock().expect("state lock is not poisoned")
    }

    pub fn status(&self) -> OrchestratorStatus {
        let providers = self
            .inner
            .sources
            .iter()
            .map(|source| {
                let stats = source.stats();
                ProviderHealth {
                    id: source.id(),
                    healthy: stats.is_healthy(),
                    success_percent: stats.success_percent(),
                    stats,
                }
            })
            .collect();
        OrchestratorStatus {
            state: self.state(),
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::SeqCst),
            active_streams: self.inner.active_streams.load(Ordering::SeqCst),
            cache: self.inner.cache.health(),
            providers,
        }
    }

    /// Start ingestion: probe the cache tiers, run one synchronous priming
    /// cycle, then spawn the polling loop and one supervisor per
    /// streaming-capable provider.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        {
            let mut state = self.inner.state.lock().expect("state lock is not poisoned");
            match *state {
                IngestionState::Stopped | IngestionState::Failed => {
                    *state = IngestionState::Starting;
                }
                other => return Err(OrchestratorError::NotStartable { state: other }),
            }
        }
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        self.inner.critical_emitted.store(false, Ordering::SeqCst);

        let cache = self.inner.cache.health();
        if cache.durable_tier_configured && !cache.durable_tier_available {
            tracing::warn!("durable cache tier is unreachable; running on the local tier only");
        }

        // Priming fetch; a failure counts toward the breaker like any cycle.
        if matches!(self.inner.run_cycle().await, CycleOutcome::Critical) {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self
            .inner
            .shutdown
            .lock()
            .expect("shutdown lock is not poisoned") = shutdown_tx;

        let mut tasks = self.tasks.lock().expect("task lock is not poisoned");
        tasks.push(tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            shutdown_rx.clone(),
        )));
        for source in &self.inner.sources {
            if source.supports_streaming() {
                tasks.push(tokio::spawn(stream_supervisor(
                    Arc::clone(&self.inner),
                    Arc::clone(source),
                    shutdown_rx.clone(),
                )));
            }
        }

        *self.inner.state.lock().expect("state lock is not poisoned") = IngestionState::Running;
        self.inner.emit(OrchestratorEvent::Started);
        tracing::info!(providers = self.inner.sources.len(), "ingestion started");
        Ok(())
    }

    /// Stop ingestion: signal every task, then abort them. In-flight fetches
    /// are abandoned and their results discarded.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().expect("state lock is not poisoned");
            match *state {
                IngestionState::Running | IngestionState::Failed | IngestionState::Starting => {
                    *state = IngestionState::Stopping;
                }
                IngestionState::Stopped | IngestionState::Stopping => return,
            }
        }

        let _ = self
            .inner
            .shutdown
            .lock()
            .expect("shutdown lock is not poisoned")
            .send(true);

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .expect("task lock is not poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        self.inner.active_streams.store(0, Ordering::SeqCst);

        *self.inner.state.lock().expect("state lock is not poisoned") = IngestionState::Stopped;
        self.inner.emit(OrchestratorEvent::Stopped);
        tracing::info!("ingestion stopped");
    }
}

impl Inner {
    /// One polling cycle: concurrent fan-out, partial-success aggregation,
    /// then consolidate, validate, cache, and publish.
    async fn run_cycle(&self) -> CycleOutcome {
        let base = self.registry.base_currency().clone();
        let targets: Vec<CurrencyCode> = self
            .registry
            .active_currencies()
            .into_iter()
            .filter(|code| *code != base)
            .collect();
        let request = match FetchRequest::new(base, targets) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "cycle skipped; no target currencies");
                return self.record_cycle_failure();
            }
        };

        let mut fetches = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let request = request.clone();
            let fetch_timeout = self.config.fetch_timeout;
            fetches.spawn(async move {
                let id = source.id();
                let result = tokio::time::timeout(fetch_timeout, source.fetch(request)).await;
                (id, result)
            });
        }

        let mut harvest: Vec<RawQuote> = Vec::new();
        let mut responders = 0usize;
        while let Some(joined) = fetches.join_next().await {
            let Ok((provider, result)) = joined else {
                continue;
            };
            match result {
                Ok(Ok(batch)) => {
                    responders += 1;
                    harvest.extend(batch.quotes);
                }
                Ok(Err(error)) => {
                    tracing::warn!(provider = %provider, %error, "provider fetch failed");
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %provider,
                        timeout_ms = self.config.fetch_timeout.as_millis() as u64,
                        "provider fetch exceeded the cycle budget"
                    );
                }
            }
        }

        if responders == 0 {
            tracing::error!("cycle hard failure; every provider failed");
            return self.record_cycle_failure();
        }

        let mut accepted = Vec::new();
        for rate in self.consolidator.consolidate_cycle(harvest) {
            let verdict = self.validator.validate_consolidated(&rate);
            if !verdict.is_valid {
                tracing::warn!(pair = %rate.pair, errors = ?verdict.errors, "consolidated rate rejected");
                continue;
            }
            if !verdict.warnings.is_empty() {
                tracing::debug!(pair = %rate.pair, warnings = ?verdict.warnings, "consolidated rate flagged");
            }
            self.cache.put_consolidated(&rate);
            self.bus.publish_consolidated(&rate);
            accepted.push(rate);
        }
        let arbitrage_opportunities = self.validator.check_arbitrage(&accepted);
        if !arbitrage_opportunities.is_empty() {
            tracing::info!(
                count = arbitrage_opportunities.len(),
                "triangular inconsistencies detected this cycle"
            );
        }

        self.consecutive_failures.store(0, Ordering::SeqCst);
        tracing::debug!(pairs = accepted.len(), responders, "cycle completed");
        self.emit(OrchestratorEvent::RatesUpdated {
            rates: accepted,
            arbitrage_opportunities,
        });
        CycleOutcome::Completed
    }

    fn record_cycle_failure(&self) -> CycleOutcome {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.max_consecutive_failures {
            // swap guarantees a single critical notification per trip.
            if !self.critical_emitted.swap(true, Ordering::SeqCst) {
                *self.state.lock().expect("state lock is not poisoned") = IngestionState::Failed;
                let _ = self
                    .shutdown
                    .lock()
                    .expect("shutdown lock is not poisoned")
                    .send(true);
                tracing::error!(
                    consecutive_failures = failures,
                    "breaker tripped; ingestion halted pending operator restart"
                );
                self.emit(OrchestratorEvent::CriticalFailure {
                    consecutive_failures: failures,
                });
            }
            return CycleOutcome::Critical;
        }
        self.emit(OrchestratorEvent::CycleFailed {
            consecutive_failures: failures,
        });
        CycleOutcome::Failed
    }

    fn handle_stream_tick(&self, quote: RawQuote) {
        let verdict = self.validator.validate_stream_quote(&quote);
        if !verdict.is_valid {
            tracing::debug!(pair = %quote.pair, errors = ?verdict.errors, "stream tick rejected");
            return;
        }
        let rate = ConsolidatedRate::from_stream_tick(&quote);
        self.cache.put_stream_tick(&rate);
        self.bus.publish_stream_tick(&quote);
    }

    fn stream_pairs(&self) -> Vec<PairSymbol> {
        let base = self.registry.base_currency().clone();
        self.registry
            .active_currencies()
            .into_iter()
            .filter_map(|code| PairSymbol::new(base.clone(), code).ok())
            .collect()
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }
}

async fn poll_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The priming cycle already ran; swallow the interval's immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if matches!(inner.run_cycle().await, CycleOutcome::Critical) {
                    break;
                }
            }
        }
    }
}

async fn stream_supervisor(
    inner: Arc<Inner>,
    source: Arc<dyn RateSource>,
    mut shutdown: watch::Receiver<bool>,
) {
    let provider = source.id();
    loop {
        if *shutdown.borrow() {
            break;
        }

        match StreamRequest::new(inner.stream_pairs()) {
            Ok(request) => match source.connect_stream(request).await {
                Ok(mut stream) => {
                    inner.active_streams.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(provider = %provider, "stream connected");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            quote = stream.next() => match quote {
                                Some(quote) => inner.handle_stream_tick(quote),
                                None => {
                                    tracing::warn!(provider = %provider, "stream disconnected");
                                    break;
                                }
                            }
                        }
                    }
                    inner.active_streams.fetch_sub(1, Ordering::SeqCst);
                }
                Err(error) => {
                    tracing::warn!(provider = %provider, %error, "stream connect failed");
                }
            },
            Err(error) => {
                tracing::warn!(provider = %provider, %error, "no pairs to stream");
            }
        }

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(inner.config.stream_reconnect_delay) => {}
        }
    }
}

