//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe `<target><health path>` of every service
//! - Probe every service on demand when `/health` is polled
//! - Keep the latest result and a bounded history per service
//!
//! # Design Decisions
//! - One ticker per service, each with its own interval
//! - A probe is skipped while the previous one for the same service is
//!   still running, so slow services never pile up checks
//! - Timeout, DNS, refused and non-2xx are all "unhealthy"
//! - Services with an invalid target are unhealthy without a network call

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, HeaderValue};
use futures_util::future::join_all;
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use crate::config::{HealthCheckConfig, ServiceConfig};
use crate::health::state::{HealthHistory, ServiceHealth};
use crate::lifecycle::ShutdownSignal;
use crate::net::{ForwardError, Transport, UpstreamRequest};
use crate::observability::MetricsCollector;
use crate::routing::{join_target, Target};

const USER_AGENT: &str = "salambot-gateway-health-check";

/// Where a service is probed, or why it cannot be.
#[derive(Debug, Clone)]
enum ProbeTarget {
    Url(Url),
    Invalid(String),
}

#[derive(Debug)]
struct ServiceSlot {
    name: String,
    probe: ProbeTarget,
    interval: Duration,
    in_flight: AtomicBool,
    latest: Mutex<ServiceHealth>,
    history: Mutex<HealthHistory>,
}

/// Clears the in-flight flag even if the probe future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct HealthChecker {
    slots: Vec<Arc<ServiceSlot>>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsCollector>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        services: &[ServiceConfig],
        config: &HealthCheckConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let slots = services
            .iter()
            .map(|service| {
                let probe = match Target::parse(&service.target) {
                    Target::Valid(base) => {
                        let path = if service.health.path.starts_with('/') {
                            service.health.path.clone()
                        } else {
                            format!("/{}", service.health.path)
                        };
                        ProbeTarget::Url(join_target(&base, &path, None))
                    }
                    Target::Invalid { reason, .. } => ProbeTarget::Invalid(reason),
                };
                Arc::new(ServiceSlot {
                    name: service.name.clone(),
                    probe,
                    interval: Duration::from_secs(service.health.interval_secs.max(1)),
                    in_flight: AtomicBool::new(false),
                    latest: Mutex::new(ServiceHealth::unknown(service.name.as_str())),
                    history: Mutex::new(HealthHistory::new(config.history_size)),
                })
            })
            .collect();

        Self {
            slots,
            transport,
            metrics,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Spawn one probe loop per service. Loops end when `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: ShutdownSignal) -> Vec<tokio::task::JoinHandle<()>> {
        self.slots
            .iter()
            .map(|slot| {
                let checker = Arc::clone(self);
                let slot = Arc::clone(slot);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::info!(
                        service = %slot.name,
                        interval_secs = slot.interval.as_secs(),
                        "Health monitor starting"
                    );
                    let mut ticker = time::interval(slot.interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                // Detached so a hung probe never delays the next tick decision.
                                let checker = Arc::clone(&checker);
                                let slot = Arc::clone(&slot);
                                tokio::spawn(async move {
                                    checker.probe(&slot).await;
                                });
                            }
                            _ = shutdown.recv() => {
                                tracing::info!(service = %slot.name, "Health monitor stopping");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Probe every service concurrently and return the latest health of each,
    /// in configuration order.
    pub async fn check_all(&self) -> Vec<ServiceHealth> {
        join_all(self.slots.iter().map(|slot| self.probe(slot))).await
    }

    /// Probe one service. `None` if the service is unknown.
    pub async fn check_service(&self, name: &str) -> Option<ServiceHealth> {
        let slot = self.slots.iter().find(|s| s.name == name)?;
        Some(self.probe(slot).await)
    }

    /// Latest known health of every service, without probing.
    pub fn latest(&self) -> Vec<ServiceHealth> {
        self.slots
            .iter()
            .map(|slot| slot.latest.lock().expect("health mutex poisoned").clone())
            .collect()
    }

    /// Probe history of one service, oldest first.
    pub fn history(&self, name: &str) -> Option<Vec<ServiceHealth>> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .map(|slot| slot.history.lock().expect("health mutex poisoned").to_vec())
    }

    async fn probe(&self, slot: &ServiceSlot) -> ServiceHealth {
        if slot
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(service = %slot.name, "Previous health check still running, skipping");
            return slot.latest.lock().expect("health mutex poisoned").clone();
        }
        let _in_flight = InFlight(&slot.in_flight);

        let started = Instant::now();
        let (is_healthy, status_code, error) = match &slot.probe {
            ProbeTarget::Invalid(reason) => (false, None, Some(format!("invalid target: {}", reason))),
            ProbeTarget::Url(url) => self.request(&slot.name, url).await,
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        let health = ServiceHealth {
            service_name: slot.name.clone(),
            is_healthy,
            last_check_at: Some(chrono::Utc::now()),
            response_time_ms,
            status_code,
            error,
        };

        let previous = {
            let mut latest = slot.latest.lock().expect("health mutex poisoned");
            std::mem::replace(&mut *latest, health.clone())
        };
        slot.history
            .lock()
            .expect("health mutex poisoned")
            .push(health.clone());

        if previous.last_check_at.is_some() && previous.is_healthy != is_healthy {
            if is_healthy {
                tracing::info!(service = %slot.name, response_time_ms, "Service recovered");
            } else {
                tracing::warn!(service = %slot.name, error = ?health.error, "Service became unhealthy");
            }
        }

        self.metrics.set_service_health(&slot.name, is_healthy);
        self.metrics.observe_health_check(&slot.name, response_time_ms);
        health
    }

    async fn request(&self, service: &str, url: &Url) -> (bool, Option<u16>, Option<String>) {
        let mut request = UpstreamRequest::get(url.clone());
        request
            .headers
            .insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        let outcome = match time::timeout(self.timeout, self.transport.send(request, self.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout),
        };

        match outcome {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    (true, Some(status.as_u16()), None)
                } else {
                    tracing::warn!(service = %service, status = %status, "Health check failed: non-success status");
                    (false, Some(status.as_u16()), Some(format!("HTTP {}", status.as_u16())))
                }
            }
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Health check failed");
                (false, None, Some(e.to_string()))
            }
        }
    }
}
