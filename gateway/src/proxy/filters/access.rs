use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;

pub const NAME: &str = "HTTP-ACCESS";

/// Writes one structured `access_log` line per request, once the final status
/// is known.
pub struct AccessFilter;

pub fn new_filter(_params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(AccessFilter)
}

#[async_trait]
impl Filter for AccessFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        ctx.annotate("access.received_at", chrono::Utc::now().to_rfc3339());
        Ok(FilterAction::Continue)
    }

    fn on_response(&self, ctx: &FilterContext, status: StatusCode) {
        let client = ctx
            .client_addr
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let received_at = ctx
            .annotations
            .get("access.received_at")
            .map(String::as_str)
            .unwrap_or_default();

        tracing::info!(
            target: "access_log",
            method = %ctx.method,
            path = %ctx.path(),
            status = status.as_u16(),
            client = %client,
            received_at = %received_at,
            elapsed_ms = ctx.received_at().elapsed().as_millis() as u64,
            "Request handled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::from_ip;

    #[tokio::test]
    async fn stamps_arrival_and_continues() {
        let filter = AccessFilter;
        let mut ctx = from_ip("192.0.2.1");

        assert_eq!(filter.process(&mut ctx).await.unwrap(), FilterAction::Continue);
        assert!(ctx.annotations.contains_key("access.received_at"));

        filter.on_response(&ctx, StatusCode::OK);
    }
}
