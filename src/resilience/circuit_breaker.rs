//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: testing if the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: now >= next_attempt_at (first caller becomes the probe)
//! Half-Open → Closed: probe succeeds, failure_count reset to 0
//! Half-Open → Open: probe fails, next_attempt_at = now + reset_timeout
//! ```
//!
//! # Design Decisions
//! - One breaker per service, each behind its own mutex
//! - The set of services is fixed at construction, so the map itself is never locked
//! - Exactly one probe in Half-Open: `probe_in_flight` is tested and set
//!   under the service mutex
//! - Callers classify outcomes; the breaker only sees `is_error`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::observability::MetricsCollector;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Answer to "may this request go to the service?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed.
    Allowed,
    /// The single trial request of a half-open circuit.
    Probe,
    /// Circuit open, or a probe is already in flight.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Admission::Rejected { retry_after } => {
                Some(retry_after.as_millis().div_ceil(1000).max(1) as u64)
            }
            _ => None,
        }
    }
}

/// Breaker parameters for one service.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl From<&ServiceConfig> for BreakerSettings {
    fn from(service: &ServiceConfig) -> Self {
        Self {
            failure_threshold: service.circuit_breaker.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(service.circuit_breaker.reset_timeout_ms),
        }
    }
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    settings: BreakerSettings,
    state: Mutex<CircuitState>,
}

/// Read-only view of one circuit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitStatus,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Seconds until a probe is allowed, when open.
    pub retry_after_secs: Option<u64>,
    pub last_failure_secs_ago: Option<u64>,
}

/// Per-service circuit breakers.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: HashMap<String, Circuit>,
    metrics: Arc<MetricsCollector>,
}

impl CircuitBreaker {
    pub fn new<'a>(
        services: impl IntoIterator<Item = (&'a str, BreakerSettings)>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let circuits = services
            .into_iter()
            .map(|(name, settings)| {
                (
                    name.to_string(),
                    Circuit {
                        settings,
                        state: Mutex::new(CircuitState::new()),
                    },
                )
            })
            .collect();
        Self { circuits, metrics }
    }

    pub fn from_services(services: &[ServiceConfig], metrics: Arc<MetricsCollector>) -> Self {
        Self::new(
            services
                .iter()
                .map(|s| (s.name.as_str(), BreakerSettings::from(s))),
            metrics,
        )
    }

    /// Decide whether a request to `service` may proceed.
    ///
    /// Unknown services are always allowed.
    pub fn should_allow(&self, service: &str) -> Admission {
        let Some(circuit) = self.circuits.get(service) else {
            return Admission::Allowed;
        };
        let mut state = circuit.state.lock().expect("circuit mutex poisoned");
        let now = Instant::now();

        let admission = match state.status {
            CircuitStatus::Closed => Admission::Allowed,
            CircuitStatus::Open => {
                let next_attempt_at = state.next_attempt_at.unwrap_or(now);
                if now >= next_attempt_at {
                    state.status = CircuitStatus::HalfOpen;
                    state.probe_in_flight = true;
                    tracing::info!(service = %service, "Circuit half-open, admitting probe request");
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_after: next_attempt_at - now,
                    }
                }
            }
            CircuitStatus::HalfOpen => {
                if state.probe_in_flight {
                    Admission::Rejected {
                        retry_after: Duration::from_secs(1),
                    }
                } else {
                    state.probe_in_flight = true;
                    Admission::Probe
                }
            }
        };
        drop(state);

        if !admission.is_allowed() {
            self.metrics.circuit_rejected(service);
        }
        admission
    }

    /// Like [`should_allow`](Self::should_allow), but hands back a permit that
    /// returns an unfinished probe slot when dropped.
    pub fn acquire<'a>(&'a self, service: &'a str) -> Result<CallPermit<'a>, Duration> {
        match self.should_allow(service) {
            Admission::Rejected { retry_after } => Err(retry_after),
            admission => Ok(CallPermit {
                breaker: self,
                service,
                probe: admission == Admission::Probe,
                settled: false,
            }),
        }
    }

    /// Report the outcome of a request that was admitted.
    pub fn record_outcome(&self, service: &str, is_error: bool, duration: Duration) {
        let Some(circuit) = self.circuits.get(service) else {
            return;
        };
        let mut state = circuit.state.lock().expect("circuit mutex poisoned");
        let now = Instant::now();

        tracing::trace!(
            service = %service,
            is_error,
            duration_ms = duration.as_millis() as u64,
            state = ?state.status,
            "Recording outcome"
        );

        match state.status {
            CircuitStatus::Closed => {
                if is_error {
                    state.failure_count += 1;
                    state.last_failure_at = Some(now);
                    if state.failure_count >= circuit.settings.failure_threshold {
                        self.open(service, &circuit.settings, &mut state, now);
                    }
                } else {
                    state.failure_count = 0;
                }
            }
            CircuitStatus::HalfOpen => {
                state.probe_in_flight = false;
                if is_error {
                    state.failure_count += 1;
                    state.last_failure_at = Some(now);
                    self.open(service, &circuit.settings, &mut state, now);
                } else {
                    state.status = CircuitStatus::Closed;
                    state.failure_count = 0;
                    state.next_attempt_at = None;
                    tracing::info!(service = %service, "Circuit closed, service recovered");
                    self.metrics.circuit_closed(service);
                }
            }
            CircuitStatus::Open => {
                // Late answer from a request admitted before the circuit opened.
                if is_error {
                    state.failure_count += 1;
                    state.last_failure_at = Some(now);
                }
            }
        }
    }

    /// Give back a probe slot whose request never produced an outcome.
    pub fn release_probe(&self, service: &str) {
        if let Some(circuit) = self.circuits.get(service) {
            let mut state = circuit.state.lock().expect("circuit mutex poisoned");
            if state.status == CircuitStatus::HalfOpen && state.probe_in_flight {
                state.probe_in_flight = false;
                tracing::debug!(service = %service, "Probe abandoned, slot released");
            }
        }
    }

    fn open(&self, service: &str, settings: &BreakerSettings, state: &mut CircuitState, now: Instant) {
        let previous = state.status;
        state.status = CircuitStatus::Open;
        state.next_attempt_at = Some(now + settings.reset_timeout);
        tracing::warn!(
            service = %service,
            from = ?previous,
            failure_count = state.failure_count,
            reset_timeout_ms = settings.reset_timeout.as_millis() as u64,
            "Circuit opened"
        );
        self.metrics.circuit_opened(service);
    }

    pub fn state(&self, service: &str) -> Option<CircuitSnapshot> {
        let circuit = self.circuits.get(service)?;
        let state = circuit.state.lock().expect("circuit mutex poisoned");
        let now = Instant::now();

        let retry_after_secs = match (state.status, state.next_attempt_at) {
            (CircuitStatus::Open, Some(next)) if next > now => {
                Some((next - now).as_millis().div_ceil(1000) as u64)
            }
            _ => None,
        };

        Some(CircuitSnapshot {
            service: service.to_string(),
            state: state.status,
            failure_count: state.failure_count,
            failure_threshold: circuit.settings.failure_threshold,
            reset_timeout_ms: circuit.settings.reset_timeout.as_millis() as u64,
            retry_after_secs,
            last_failure_secs_ago: state.last_failure_at.map(|t| (now - t).as_secs()),
        })
    }

    /// Snapshot every circuit, ordered by service name.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut names: Vec<&String> = self.circuits.keys().collect();
        names.sort();
        names.into_iter().filter_map(|name| self.state(name)).collect()
    }
}

/// An admitted request. Settle it with [`record`](CallPermit::record); a probe
/// permit dropped unsettled frees the half-open slot.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    service: &'a str,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, is_error: bool, duration: Duration) {
        self.settled = true;
        self.breaker.record_outcome(self.service, is_error, duration);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe(self.service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoringConfig;

    fn breaker(threshold: u32, reset_ms: u64) -> (CircuitBreaker, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new(&MonitoringConfig::default()).unwrap());
        let breaker = CircuitBreaker::new(
            [(
                "ai",
                BreakerSettings {
                    failure_threshold: threshold,
                    reset_timeout: Duration::from_millis(reset_ms),
                },
            )],
            metrics.clone(),
        );
        (breaker, metrics)
    }

    fn fail(breaker: &CircuitBreaker, times: u32) {
        for _ in 0..times {
            assert!(breaker.should_allow("ai").is_allowed());
            breaker.record_outcome("ai", true, Duration::from_millis(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_rejects_until_next_attempt() {
        let (breaker, metrics) = breaker(3, 30_000);

        fail(&breaker, 2);
        assert_eq!(breaker.state("ai").unwrap().state, CircuitStatus::Closed);
        fail(&breaker, 1);

        let snapshot = breaker.state("ai").unwrap();
        assert_eq!(snapshot.state, CircuitStatus::Open);
        assert_eq!(snapshot.failure_count, 3);
        assert_eq!(snapshot.retry_after_secs, Some(30));

        let admission = breaker.should_allow("ai");
        assert!(!admission.is_allowed());
        assert_eq!(admission.retry_after_secs(), Some(30));

        tokio::time::advance(Duration::from_millis(29_500)).await;
        assert_eq!(breaker.should_allow("ai").retry_after_secs(), Some(1));

        let counts = &metrics.snapshot().circuit_breakers["ai"];
        assert_eq!(counts.opened, 1);
        assert_eq!(counts.rejections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_probe_closes_and_resets() {
        let (breaker, metrics) = breaker(3, 1_000);
        fail(&breaker, 3);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(breaker.should_allow("ai"), Admission::Probe);
        assert_eq!(breaker.state("ai").unwrap().state, CircuitStatus::HalfOpen);
        assert!(!breaker.should_allow("ai").is_allowed());

        breaker.record_outcome("ai", false, Duration::from_millis(5));
        let snapshot = breaker.state("ai").unwrap();
        assert_eq!(snapshot.state, CircuitStatus::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(breaker.should_allow("ai"), Admission::Allowed);
        assert_eq!(metrics.snapshot().circuit_breakers["ai"].closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_fresh_timeout() {
        let (breaker, metrics) = breaker(2, 1_000);
        fail(&breaker, 2);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(breaker.should_allow("ai"), Admission::Probe);
        breaker.record_outcome("ai", true, Duration::from_millis(5));

        let snapshot = breaker.state("ai").unwrap();
        assert_eq!(snapshot.state, CircuitStatus::Open);
        assert_eq!(snapshot.retry_after_secs, Some(1));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!breaker.should_allow("ai").is_allowed());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.should_allow("ai"), Admission::Probe);
        assert_eq!(metrics.snapshot().circuit_breakers["ai"].opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn success_in_closed_state_resets_failures() {
        let (breaker, _) = breaker(3, 1_000);
        fail(&breaker, 2);
        breaker.record_outcome("ai", false, Duration::from_millis(5));
        fail(&breaker, 2);
        assert_eq!(breaker.state("ai").unwrap().state, CircuitStatus::Closed);
        assert_eq!(breaker.state("ai").unwrap().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_permit_frees_the_slot() {
        let (breaker, _) = breaker(1, 100);
        fail(&breaker, 1);
        tokio::time::advance(Duration::from_millis(100)).await;

        let permit = breaker.acquire("ai").unwrap();
        assert!(permit.is_probe());
        assert!(breaker.acquire("ai").is_err());
        drop(permit);

        let permit = breaker.acquire("ai").unwrap();
        assert!(permit.is_probe());
        permit.record(false, Duration::from_millis(1));
        assert_eq!(breaker.state("ai").unwrap().state, CircuitStatus::Closed);
    }

    #[test]
    fn unknown_service_is_allowed() {
        let (breaker, _) = breaker(1, 100);
        assert_eq!(breaker.should_allow("whatsapp"), Admission::Allowed);
        breaker.record_outcome("whatsapp", true, Duration::ZERO);
        assert!(breaker.state("whatsapp").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_probe_under_concurrency() {
        let (breaker, _) = breaker(1, 50);
        let breaker = Arc::new(breaker);
        fail(&breaker, 1);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let barrier = Arc::new(tokio::sync::Barrier::new(32));
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let breaker = breaker.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                breaker.should_allow("ai")
            }));
        }

        let mut probes = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Admission::Probe => probes += 1,
                Admission::Rejected { .. } => rejected += 1,
                Admission::Allowed => panic!("half-open circuit admitted a regular request"),
            }
        }
        assert_eq!(probes, 1);
        assert_eq!(rejected, 31);
    }
}
