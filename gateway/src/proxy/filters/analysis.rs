use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const NAME: &str = "ANALYSIS";

/// Traffic counters by method and response status class.
///
/// Counts are exported through `metrics` and kept locally for inspection.
#[derive(Default)]
pub struct AnalysisFilter {
    requests: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
}

pub fn new_filter(_params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(AnalysisFilter::default())
}

impl AnalysisFilter {
    /// (requests, 2xx, 4xx, 5xx)
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.requests.load(Ordering::Relaxed),
            self.status_2xx.load(Ordering::Relaxed),
            self.status_4xx.load(Ordering::Relaxed),
            self.status_5xx.load(Ordering::Relaxed),
        )
    }
}

/// Metric label for a request method. Extension methods collapse into `OTHER`
/// so clients cannot mint new series.
fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::HEAD => "HEAD",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::OPTIONS => "OPTIONS",
        Method::CONNECT => "CONNECT",
        Method::TRACE => "TRACE",
        _ => "OTHER",
    }
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

#[async_trait]
impl Filter for AnalysisFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        let seq = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!("gateway_analysis_requests_total", "method" => method_label(&ctx.method))
            .increment(1);
        ctx.annotate("analysis.seq", seq.to_string());
        Ok(FilterAction::Continue)
    }

    fn on_response(&self, ctx: &FilterContext, status: StatusCode) {
        let class = status_class(status);
        match class {
            "2xx" => self.status_2xx.fetch_add(1, Ordering::Relaxed),
            "4xx" => self.status_4xx.fetch_add(1, Ordering::Relaxed),
            "5xx" => self.status_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
        metrics::counter!(
            "gateway_analysis_responses_total",
            "method" => method_label(&ctx.method),
            "class" => class
        )
        .increment(1);
    }
}
