//! Per-provider circuit breaker
//!
//! Tracks consecutive failures of one provider and stops calls to it for
//! `open_duration` once `failure_threshold` is reached. After the window the
//! next permission check moves the breaker to half-open and lets probes
//! through; enough probe successes close it again, one probe failure reopens it.
//!
//! All state lives behind a single mutex per breaker. The check-then-record
//! pair is deliberately not atomic: two callers may both be permitted right at
//! the threshold.

use crate::providers::ProviderId;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default consecutive failures before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default time the breaker stays open
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(60);
/// Default probe successes needed to close from half-open
pub const DEFAULT_HALF_OPEN_SUCCESSES: u32 = 1;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls permitted
    Closed,
    /// Calls forbidden until `open_until`
    Open,
    /// Probing: calls permitted, outcome decides the next state
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Thresholds for one breaker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_successes_required: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_duration: DEFAULT_OPEN_DURATION,
            half_open_successes_required: DEFAULT_HALF_OPEN_SUCCESSES,
        }
    }
}

/// Point-in-time copy of a breaker's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub successes_in_half_open: u32,
    pub open_until: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    successes_in_half_open: u32,
    open_until: Option<Instant>,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            successes_in_half_open: 0,
            open_until: None,
        }
    }

    fn open(&mut self, open_duration: Duration) {
        self.state = CircuitState::Open;
        self.consecutive_failures = 0;
        self.successes_in_half_open = 0;
        self.open_until = Some(Instant::now() + open_duration);
    }
}

/// Result of a permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub permitted: bool,
    /// Set when the check moved the breaker to a new state
    pub transition: Option<CircuitState>,
}

/// Circuit breaker for a single provider
///
/// Created once per provider at startup and never shared between providers.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker in the `Closed` state
    ///
    /// Thresholds of zero are raised to one: a breaker that opens without any
    /// failure, or closes without any probe, is not meaningful.
    pub fn new(provider: ProviderId, settings: BreakerSettings) -> Self {
        let settings = BreakerSettings {
            failure_threshold: settings.failure_threshold.max(1),
            half_open_successes_required: settings.half_open_successes_required.max(1),
            ..settings
        };
        Self {
            provider,
            settings,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Decide whether a call may be attempted now
    ///
    /// Side-effecting: when the open window has elapsed this performs the
    /// Open → HalfOpen transition. Call exactly once per dispatch attempt,
    /// immediately before the attempt.
    pub async fn is_call_permitted(&self) -> bool {
        self.admit().await.permitted
    }

    /// Same check as `is_call_permitted`, also reporting a state transition
    pub async fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Admission {
                permitted: true,
                transition: None,
            },
            CircuitState::Open => {
                let elapsed = inner
                    .open_until
                    .is_none_or(|open_until| Instant::now() >= open_until);
                if !elapsed {
                    return Admission {
                        permitted: false,
                        transition: None,
                    };
                }
                inner.state = CircuitState::HalfOpen;
                inner.successes_in_half_open = 0;
                tracing::info!(
                    provider = %self.provider,
                    "Circuit breaker half-open, probing provider"
                );
                Admission {
                    permitted: true,
                    transition: Some(CircuitState::HalfOpen),
                }
            }
        }
    }

    /// Record the outcome of a successful attempt
    ///
    /// Returns the new state when this call caused a transition.
    pub async fn record_success(&self) -> Option<CircuitState> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.successes_in_half_open += 1;
                if inner.successes_in_half_open >= self.settings.half_open_successes_required {
                    *inner = Inner::closed();
                    tracing::info!(
                        provider = %self.provider,
                        "Circuit breaker closed, provider recovered"
                    );
                    Some(CircuitState::Closed)
                } else {
                    tracing::debug!(
                        provider = %self.provider,
                        successes = inner.successes_in_half_open,
                        required = self.settings.half_open_successes_required,
                        "Half-open probe succeeded"
                    );
                    None
                }
            }
            // A call permitted before a concurrent failure reopened the breaker.
            CircuitState::Open => None,
        }
    }

    /// Record the outcome of a failed attempt
    ///
    /// Returns the new state when this call caused a transition.
    pub async fn record_failure(&self) -> Option<CircuitState> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    let failures = inner.consecutive_failures;
                    inner.open(self.settings.open_duration);
                    tracing::warn!(
                        provider = %self.provider,
                        consecutive_failures = failures,
                        open_seconds = self.settings.open_duration.as_secs_f64(),
                        "Circuit breaker opened after consecutive failures"
                    );
                    Some(CircuitState::Open)
                } else {
                    tracing::debug!(
                        provider = %self.provider,
                        consecutive_failures = inner.consecutive_failures,
                        threshold = self.settings.failure_threshold,
                        "Provider failure recorded (breaker still closed)"
                    );
                    None
                }
            }
            CircuitState::HalfOpen => {
                inner.open(self.settings.open_duration);
                tracing::warn!(
                    provider = %self.provider,
                    open_seconds = self.settings.open_duration.as_secs_f64(),
                    "Half-open probe failed, circuit breaker reopened"
                );
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Administrative reset to `Closed` with all counters zeroed
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::closed();
        tracing::info!(provider = %self.provider, "Circuit breaker manually reset");
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            successes_in_half_open: inner.successes_in_half_open,
            open_until: inner.open_until,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}
