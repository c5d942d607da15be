use super::Settings;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const NAME: &str = "CIRCUIT-BREAKE";

const PROBE_ANNOTATION: &str = "circuit_breaker.probe";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    /// Consecutive upstream 5xx responses that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is let through.
    pub open_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { since: Instant },
    /// One probe request is in flight.
    HalfOpen,
}

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
}

/// Sheds load with 503 while the upstream keeps failing.
///
/// Fed by the final response status through [`Filter::on_response`].
pub struct CircuitBreakerFilter {
    settings: Settings<CircuitBreakerSettings>,
    breaker: Mutex<Breaker>,
}

pub fn new_filter(params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(CircuitBreakerFilter {
        settings: Settings::parse(NAME, params),
        breaker: Mutex::new(Breaker {
            state: CircuitState::Closed,
            consecutive_failures: 0,
        }),
    })
}

impl CircuitBreakerFilter {
    pub fn state(&self) -> CircuitState {
        self.breaker.lock().state
    }

    /// Returns whether the request may pass and whether it is the probe.
    fn admit(&self, settings: &CircuitBreakerSettings, now: Instant) -> (bool, bool) {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::Closed => (true, false),
            CircuitState::HalfOpen => (false, false),
            CircuitState::Open { since } => {
                if now.saturating_duration_since(since) >= Duration::from_secs(settings.open_secs) {
                    breaker.state = CircuitState::HalfOpen;
                    (true, true)
                } else {
                    (false, false)
                }
            }
        }
    }

    fn record(&self, settings: &CircuitBreakerSettings, failed: bool, probe: bool, now: Instant) {
        let mut breaker = self.breaker.lock();
        if failed {
            breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
            if probe || breaker.consecutive_failures >= settings.failure_threshold.max(1) {
                if breaker.state == CircuitState::Closed {
                    tracing::warn!(
                        "🔌 Circuit opened after {} consecutive failure(s)",
                        breaker.consecutive_failures
                    );
                }
                breaker.state = CircuitState::Open { since: now };
            }
        } else {
            breaker.consecutive_failures = 0;
            if probe {
                tracing::info!("🔌 Circuit closed after successful probe");
                breaker.state = CircuitState::Closed;
            }
        }
    }

    /// The probe never reached the upstream; let the next request probe.
    fn release_probe(&self, settings: &CircuitBreakerSettings, now: Instant) {
        let mut breaker = self.breaker.lock();
        if breaker.state == CircuitState::HalfOpen {
            let since = now
                .checked_sub(Duration::from_secs(settings.open_secs))
                .unwrap_or(now);
            breaker.state = CircuitState::Open { since };
        }
    }
}

#[async_trait]
impl Filter for CircuitBreakerFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        let settings = self.settings.get()?;

        let (admitted, probe) = self.admit(settings, Instant::now());
        if !admitted {
            return Ok(ctx.reject(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"));
        }
        if probe {
            ctx.annotate(PROBE_ANNOTATION, "1");
        }
        Ok(FilterAction::Continue)
    }

    fn on_response(&self, ctx: &FilterContext, status: StatusCode) {
        let Ok(settings) = self.settings.get() else {
            return;
        };
        let probe = ctx.annotations.contains_key(PROBE_ANNOTATION);
        // A gateway-produced response means the upstream was never contacted.
        if ctx.response.is_some() {
            if probe {
                self.release_probe(settings, Instant::now());
            }
            return;
        }
        self.record(settings, status.is_server_error(), probe, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::{params, request};
    use http::Method;
    use serde_json::json;

    fn breaker(threshold: u32, open_secs: u64) -> CircuitBreakerFilter {
        CircuitBreakerFilter {
            settings: Settings::parse(
                NAME,
                &params(json!({ "failure_threshold": threshold, "open_secs": open_secs })),
            ),
            breaker: Mutex::new(Breaker {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    async fn send(filter: &CircuitBreakerFilter, upstream: StatusCode) -> FilterAction {
        let mut ctx = request(Method::GET, "/");
        let action = filter.process(&mut ctx).await.unwrap();
        let status = match action {
            FilterAction::Continue => upstream,
            FilterAction::Halt => ctx.response.as_ref().unwrap().status,
        };
        filter.on_response(&ctx, status);
        action
    }

    #[tokio::test]
    async fn opens_after_threshold_and_sheds_load() {
        let filter = breaker(2, 60);

        assert_eq!(send(&filter, StatusCode::BAD_GATEWAY).await, FilterAction::Continue);
        assert_eq!(filter.state(), CircuitState::Closed);
        assert_eq!(send(&filter, StatusCode::BAD_GATEWAY).await, FilterAction::Continue);
        assert!(matches!(filter.state(), CircuitState::Open { .. }));

        assert_eq!(send(&filter, StatusCode::OK).await, FilterAction::Halt);
        assert!(matches!(filter.state(), CircuitState::Open { .. }));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let filter = breaker(2, 60);

        send(&filter, StatusCode::BAD_GATEWAY).await;
        send(&filter, StatusCode::OK).await;
        send(&filter, StatusCode::BAD_GATEWAY).await;
        assert_eq!(filter.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_closes_or_reopens() {
        let filter = breaker(1, 0);

        send(&filter, StatusCode::INTERNAL_SERVER_ERROR).await;
        assert!(matches!(filter.state(), CircuitState::Open { .. }));

        // open_secs = 0: the next request is the probe.
        assert_eq!(send(&filter, StatusCode::BAD_GATEWAY).await, FilterAction::Continue);
        assert!(matches!(filter.state(), CircuitState::Open { .. }));

        assert_eq!(send(&filter, StatusCode::OK).await, FilterAction::Continue);
        assert_eq!(filter.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn gateway_responses_are_not_upstream_results() {
        let filter = breaker(2, 60);
        send(&filter, StatusCode::BAD_GATEWAY).await;

        // A later filter answers 401 before the upstream is contacted.
        let mut ctx = request(Method::GET, "/");
        assert_eq!(filter.process(&mut ctx).await.unwrap(), FilterAction::Continue);
        ctx.reject(StatusCode::UNAUTHORIZED, "Unauthorized");
        filter.on_response(&ctx, StatusCode::UNAUTHORIZED);

        send(&filter, StatusCode::BAD_GATEWAY).await;
        assert!(matches!(filter.state(), CircuitState::Open { .. }));
    }

    #[tokio::test]
    async fn halted_probe_does_not_close_circuit() {
        let filter = breaker(1, 0);
        send(&filter, StatusCode::INTERNAL_SERVER_ERROR).await;

        let mut probe = request(Method::GET, "/");
        assert_eq!(filter.process(&mut probe).await.unwrap(), FilterAction::Continue);
        probe.reject(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
        filter.on_response(&probe, StatusCode::TOO_MANY_REQUESTS);

        assert!(matches!(filter.state(), CircuitState::Open { .. }));
        // The next request becomes the probe instead of waiting forever.
        assert_eq!(send(&filter, StatusCode::OK).await, FilterAction::Continue);
        assert_eq!(filter.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn only_one_probe_at_a_time() {
        let filter = breaker(1, 0);
        send(&filter, StatusCode::INTERNAL_SERVER_ERROR).await;

        let mut probe = request(Method::GET, "/");
        assert_eq!(filter.process(&mut probe).await.unwrap(), FilterAction::Continue);
        assert_eq!(filter.state(), CircuitState::HalfOpen);

        let mut second = request(Method::GET, "/");
        assert_eq!(filter.process(&mut second).await.unwrap(), FilterAction::Halt);
    }
}
