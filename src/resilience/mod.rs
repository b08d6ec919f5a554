//! Source-failure tracker and circuit breaker (§5). Grounded in the
//! `knhk-workflow-engine` resilience module's `CircuitBreaker`
//! (`resilience/circuit_breaker.rs`) — the nearest pack precedent for this
//! shape, since the teacher itself has no resilience layer (it calls
//! `goose` directly and lets failures bubble as `anyhow::Error`).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Per-source sliding-window failure counter (§5 "Source-failure tracker").
/// A source reaching `threshold` failures within `window` is temporarily
/// skipped by retrieval (§4.5.2).
pub struct SourceFailureTracker {
    threshold: u32,
    window: Duration,
    failures: RwLock<HashMap<String, Vec<Instant>>>,
}

impl SourceFailureTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Drop timestamps that have aged out of the window.
    fn prune(&self, source: &str) {
        let mut map = self.failures.write().unwrap();
        if let Some(timestamps) = map.get_mut(source) {
            let now = Instant::now();
            timestamps.retain(|t| now.duration_since(*t) < self.window);
        }
    }

    pub fn record_failure(&self, source: &str) {
        self.prune(source);
        self.failures
            .write()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .push(Instant::now());
    }

    /// Whether `source` has reached `threshold` failures within the window
    /// and should be skipped this cycle.
    pub fn is_skipped(&self, source: &str) -> bool {
        self.prune(source);
        self.failures
            .read()
            .unwrap()
            .get(source)
            .map(|t| t.len() as u32 >= self.threshold)
            .unwrap_or(false)
    }

    pub fn reset(&self, source: &str) {
        self.failures.write().unwrap().remove(source);
    }
}

impl Default for SourceFailureTracker {
    fn default() -> Self {
        // Defaults to the spec's `SOURCE_SKIP_THRESHOLD` / `SOURCE_SKIP_WINDOW_SECONDS`.
        Self::new(3, Duration::from_secs(120))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
}

/// Simple fail-fast circuit breaker for the optional RAG gateway
/// collaborator (§5): opens for `cooldown` after any upstream error; any
/// call during the open window fails fast without attempting the operation.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    opened_at: RwLock<Option<Instant>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            opened_at: RwLock::new(None),
            cooldown,
        }
    }

    fn maybe_close(&self) {
        let mut state = self.state.write().unwrap();
        if *state == CircuitState::Open
            && let Some(opened) = *self.opened_at.read().unwrap()
            && opened.elapsed() >= self.cooldown
        {
            *state = CircuitState::Closed;
        }
    }

    pub fn is_open(&self) -> bool {
        self.maybe_close();
        *self.state.read().unwrap() == CircuitState::Open
    }

    pub fn record_failure(&self) {
        *self.state.write().unwrap() = CircuitState::Open;
        *self.opened_at.write().unwrap() = Some(Instant::now());
    }

    pub fn record_success(&self) {
        *self.state.write().unwrap() = CircuitState::Closed;
        *self.opened_at.write().unwrap() = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}
