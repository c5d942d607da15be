use super::Settings;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams, FilterResponse};
use async_trait::async_trait;
use http::header::{HeaderValue, RETRY_AFTER};
use http::StatusCode;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

pub const NAME: &str = "RATE-LIMITING";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Tokens refilled per second.
    pub rate: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            rate: 100.0,
            burst: 200,
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Gateway-wide token bucket. Requests beyond the budget get 429.
pub struct RateLimitingFilter {
    settings: Settings<RateLimitSettings>,
    bucket: Mutex<Bucket>,
}

pub fn new_filter(params: &FilterParams) -> Arc<dyn Filter> {
    let settings = Settings::<RateLimitSettings>::parse(NAME, params);
    let tokens = settings.get().map(|s| f64::from(s.burst)).unwrap_or(0.0);
    Arc::new(RateLimitingFilter {
        settings,
        bucket: Mutex::new(Bucket {
            tokens,
            refilled_at: Instant::now(),
        }),
    })
}

impl RateLimitingFilter {
    fn try_acquire(&self, settings: &RateLimitSettings, now: Instant) -> bool {
        let mut bucket = self.bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * settings.rate).min(f64::from(settings.burst));
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Filter for RateLimitingFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        let settings = self.settings.get()?;
        if settings.rate <= 0.0 || !settings.rate.is_finite() {
            return Err(FilterError::Misconfigured {
                filter: NAME.to_string(),
                reason: format!("rate must be a positive number, got {}", settings.rate),
            });
        }

        if self.try_acquire(settings, Instant::now()) {
            return Ok(FilterAction::Continue);
        }

        tracing::debug!("🚦 Rate limit exceeded for {}", ctx.path());
        Ok(ctx.respond(
            FilterResponse::new(StatusCode::TOO_MANY_REQUESTS)
                .with_header(RETRY_AFTER, HeaderValue::from_static("1"))
                .with_body("Too Many Requests"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::{params, request};
    use http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn rejects_once_burst_is_spent() {
        let filter = new_filter(&params(json!({ "rate": 0.001, "burst": 2 })));

        for _ in 0..2 {
            let mut ctx = request(Method::GET, "/");
            assert_eq!(filter.process(&mut ctx).await.unwrap(), FilterAction::Continue);
        }

        let mut ctx = request(Method::GET, "/");
        assert_eq!(filter.process(&mut ctx).await.unwrap(), FilterAction::Halt);
        let response = ctx.response.unwrap();
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers[RETRY_AFTER], "1");
    }

    #[test]
    fn refills_over_time() {
        let settings = RateLimitSettings {
            rate: 10.0,
            burst: 1,
        };
        let filter = RateLimitingFilter {
            settings: Settings::parse(NAME, &FilterParams::new()),
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                refilled_at: Instant::now(),
            }),
        };
        let start = Instant::now();

        assert!(!filter.try_acquire(&settings, start));
        assert!(filter.try_acquire(&settings, start + std::time::Duration::from_millis(150)));
    }

    #[tokio::test]
    async fn zero_rate_is_misconfigured() {
        let filter = new_filter(&params(json!({ "rate": 0 })));
        let err = filter.process(&mut request(Method::GET, "/")).await.unwrap_err();
        assert!(matches!(err, FilterError::Misconfigured { .. }));
    }
}
