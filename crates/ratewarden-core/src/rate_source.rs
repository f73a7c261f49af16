//! Rate source trait and request/response types.
//!
//! This module defines the adapter contract ([`RateSource`]) every external
//! provider implements, along with the structured error type the orchestrator
//! uses to decide whether a cycle failure is retryable.
//!
//! | Operation | Request | Response | Description |
//! |-----------|---------|----------|-------------|
//! | Fetch | [`FetchRequest`] | [`QuoteBatch`] | One polling-cycle pull |
//! | Stream | [`StreamRequest`] | [`RateStream`] | Persistent tick stream |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{CurrencyCode, PairSymbol, ProviderId, ProviderStats, RawQuote, UtcDateTime};

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Timeout,
    Unauthorized,
    RateLimited,
    MalformedPayload,
    Unavailable,
    StreamingUnsupported,
    InvalidRequest,
    Internal,
}

/// Structured provider error.
///
/// Always recoverable at the cycle level: a failing provider only costs the
/// cycle its own quotes, never another provider's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unauthorized,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::MalformedPayload,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn streaming_unsupported(provider: &ProviderId) -> Self {
        Self {
            kind: SourceErrorKind::StreamingUnsupported,
            message: format!("provider '{provider}' has no streaming capability"),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Timeout => "provider.timeout",
            SourceErrorKind::Unauthorized => "provider.unauthorized",
            SourceErrorKind::RateLimited => "provider.rate_limited",
            SourceErrorKind::MalformedPayload => "provider.malformed_payload",
            SourceErrorKind::Unavailable => "provider.unavailable",
            SourceErrorKind::StreamingUnsupported => "provider.streaming_unsupported",
            SourceErrorKind::InvalidRequest => "provider.invalid_request",
            SourceErrorKind::Internal => "provider.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// One polling-cycle pull: base currency plus target symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub base: CurrencyCode,
    pub targets: Vec<CurrencyCode>,
}

impl FetchRequest {
    pub fn new(base: CurrencyCode, targets: Vec<CurrencyCode>) -> Result<Self, SourceError> {
        if targets.is_empty() {
            return Err(SourceError::invalid_request(
                "fetch request must include at least one target currency",
            ));
        }
        if targets.contains(&base) {
            return Err(SourceError::invalid_request(
                "fetch targets must not include the base currency",
            ));
        }
        Ok(Self { base, targets })
    }
}

/// Normalized fetch result.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteBatch {
    pub quotes: Vec<RawQuote>,
}

/// Streaming subscription naming `"BASE/QUOTE"` symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub pairs: Vec<PairSymbol>,
}

impl StreamRequest {
    pub fn new(pairs: Vec<PairSymbol>) -> Result<Self, SourceError> {
        if pairs.is_empty() {
            return Err(SourceError::invalid_request(
                "stream request must name at least one pair",
            ));
        }
        Ok(Self { pairs })
    }
}

/// Handle to one live streaming connection.
///
/// Quotes arrive sequentially per connection. The channel closing signals a
/// dropped connection; reconnection policy belongs to the orchestrator, not
/// the adapter. Dropping the handle aborts the pump task.
#[derive(Debug)]
pub struct RateStream {
    events: mpsc::Receiver<RawQuote>,
    pump: JoinHandle<()>,
}

impl RateStream {
    pub fn new(events: mpsc::Receiver<RawQuote>, pump: JoinHandle<()>) -> Self {
        Self { events, pump }
    }

    /// Next quote, or `None` once the connection is closed.
    pub async fn next(&mut self) -> Option<RawQuote> {
        self.events.recv().await
    }
}

impl Drop for RateStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Rate source adapter contract.
///
/// One instance per external provider. Implementations must be `Send + Sync`;
/// the orchestrator shares them across cycle tasks and stream supervisors.
/// An adapter reports failures only for itself and records every attempt in
/// its own stats.
pub trait RateSource: Send + Sync {
    /// Unique provider identifier.
    fn id(&self) -> ProviderId;

    /// Static trust weight applied during consolidation, 0.0..=1.0.
    fn reliability(&self) -> f64;

    /// Whether [`connect_stream`](RateSource::connect_stream) is available.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Snapshot of cumulative fetch statistics.
    fn stats(&self) -> ProviderStats;

    /// Pull current rates for the requested targets against the base.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on timeout, auth failure, rate limiting, or a
    /// malformed payload. The error never reflects another provider's state.
    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<QuoteBatch, SourceError>> + Send + 'a>>;

    /// Open a persistent streaming connection for the named pairs.
    ///
    /// Default implementation rejects; only streaming-capable adapters
    /// override it.
    fn connect_stream<'a>(
        &'a self,
        req: StreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RateStream, SourceError>> + Send + 'a>> {
        let _ = req;
        Box::pin(async move { Err(SourceError::streaming_unsupported(&self.id())) })
    }
}

/// Shared mutable stats behind each adapter.
#[derive(Debug, Default)]
pub struct ProviderStatsTracker {
    inner: Mutex<ProviderStats>,
}

impl ProviderStatsTracker {
    pub fn record_success(&self, elapsed: Duration) {
        let mut stats = self.inner.lock().expect("stats lock is not poisoned");
        stats.requests += 1;
        stats.successes += 1;
        stats.last_success = Some(UtcDateTime::now());
        Self::fold_response_time(&mut stats, elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        let mut stats = self.inner.lock().expect("stats lock is not poisoned");
        stats.requests += 1;
        stats.failures += 1;
        stats.last_failure = Some(UtcDateTime::now());
        Self::fold_response_time(&mut stats, elapsed);
    }

    pub fn snapshot(&self) -> ProviderStats {
        *self.inner.lock().expect("stats lock is not poisoned")
    }

    fn fold_response_time(stats: &mut ProviderStats, elapsed: Duration) {
        let sample_ms = elapsed.as_secs_f64() * 1_000.0;
        let count = stats.requests as f64;
        // Running mean over all attempts, successes and failures alike.
        stats.avg_response_time_ms += (sample_ms - stats.avg_response_time_ms) / count;
    }
}
