pub mod filters;

use crate::constants;
use crate::filter::{ChainError, ChainOutcome, FilterAction, FilterContext, FilterResponse};
use crate::state::{AppState, Snapshot};
use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use pingora::http::ResponseHeader;
use pingora::prelude::*;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub struct DynamicProxy {
    pub state: Arc<AppState>,
}

#[derive(Default)]
pub struct ProxyCtx {
    /// Configuration and chain pinned for the whole request.
    pub snapshot: Option<Arc<Snapshot>>,
    pub filter_ctx: Option<FilterContext>,
    /// Filters invoked by the chain run; only these see `on_response`.
    pub invoked: usize,
}

/// Builds the filter context for an incoming request, with the deadline
/// derived from `timeout_ms` (zero means none).
pub fn request_context(req: &RequestHeader, client: Option<IpAddr>, timeout_ms: u64) -> FilterContext {
    let mut ctx = FilterContext::new(req.method.clone(), req.uri.clone())
        .with_headers(req.headers.clone());
    if let Some(ip) = client {
        ctx = ctx.with_client_addr(ip);
    }
    if timeout_ms > 0 {
        let deadline = ctx.received_at() + Duration::from_millis(timeout_ms);
        ctx = ctx.with_deadline(deadline);
    }
    ctx
}

/// Status returned to the client when the chain fails.
pub fn error_status(err: &ChainError) -> StatusCode {
    match err {
        ChainError::Filter { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ChainError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// The response the gateway sends itself, if the chain did not pass the
/// request on. It stays on the context so `on_response` hooks can tell it
/// apart from an upstream answer.
pub fn settle_response(
    result: &std::result::Result<ChainOutcome, ChainError>,
    filter_ctx: &mut FilterContext,
) -> Option<FilterResponse> {
    let response = match result {
        Ok(outcome) if outcome.action == FilterAction::Continue => return None,
        Ok(_) => filter_ctx
            .response
            .take()
            .unwrap_or_else(|| FilterResponse::new(StatusCode::FORBIDDEN)),
        Err(err) => {
            let status = error_status(err);
            FilterResponse::new(status).with_body(status.canonical_reason().unwrap_or("Error"))
        }
    };
    filter_ctx.response = Some(response.clone());
    Some(response)
}

/// Makes the upstream request headers match `desired`.
pub fn sync_request_headers(upstream: &mut RequestHeader, desired: &HeaderMap) -> Result<()> {
    let stale: Vec<_> = upstream
        .headers
        .keys()
        .filter(|name| !desired.contains_key(*name))
        .cloned()
        .collect();
    for name in stale {
        upstream.remove_header(&name);
    }

    for name in desired.keys() {
        upstream.remove_header(name);
        for value in desired.get_all(name) {
            upstream
                .append_header(name.clone(), value.clone())
                .map_err(|e| {
                    Error::explain(
                        ErrorType::InternalError,
                        format!("Failed to insert request header {}: {}", name, e),
                    )
                })?;
        }
    }
    Ok(())
}

fn apply_response_headers(header: &mut ResponseHeader, extra: &HeaderMap) -> Result<()> {
    for name in extra.keys() {
        header.remove_header(name);
        for value in extra.get_all(name) {
            header.append_header(name.clone(), value.clone()).map_err(|e| {
                Error::explain(
                    ErrorType::InternalError,
                    format!("Failed to insert response header {}: {}", name, e),
                )
            })?;
        }
    }
    Ok(())
}

/// Response header for a filter-produced response, with the chain's
/// response headers merged in.
pub fn build_response_header(response: &FilterResponse, extra: &HeaderMap) -> Result<ResponseHeader> {
    let mut header = ResponseHeader::build(response.status, Some(response.headers.len() + extra.len() + 1))?;
    apply_response_headers(&mut header, extra)?;
    apply_response_headers(&mut header, &response.headers)?;
    header.insert_header(http::header::CONTENT_LENGTH, response.body.len().to_string())?;
    Ok(header)
}

async fn write_filter_response(
    session: &mut Session,
    response: FilterResponse,
    extra: &HeaderMap,
) -> Result<()> {
    let header = build_response_header(&response, extra)?;
    let no_body = response.body.is_empty();
    session.write_response_header(Box::new(header), no_body).await?;
    if !no_body {
        session.write_response_body(Some(response.body), true).await?;
    }
    Ok(())
}

#[async_trait]
impl ProxyHttp for DynamicProxy {
    type CTX = ProxyCtx;

    fn new_ctx(&self) -> Self::CTX {
        ProxyCtx::default()
    }

    /// Runs the filter chain. Returns `true` when a filter (or a chain
    /// failure) already answered the request.
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let snapshot = self.state.snapshot();
        let client = session
            .client_addr()
            .and_then(|addr| addr.as_inet())
            .map(|addr| addr.ip());
        let mut filter_ctx = request_context(
            session.req_header(),
            client,
            snapshot.config.request_timeout_ms,
        );

        let result = snapshot.chain.run(&mut filter_ctx).await;

        let metrics = &self.state.metrics;
        match &result {
            Ok(outcome) => {
                ctx.invoked = outcome.invoked;
                match outcome.action {
                    FilterAction::Continue => metrics.forwarded.fetch_add(1, Ordering::Relaxed),
                    FilterAction::Halt => metrics.halted.fetch_add(1, Ordering::Relaxed),
                };
            }
            Err(err) => {
                ctx.invoked = err.invoked();
                match err {
                    ChainError::DeadlineExceeded { .. } => {
                        metrics.deadline_exceeded.fetch_add(1, Ordering::Relaxed)
                    }
                    ChainError::Filter { .. } => metrics.errored.fetch_add(1, Ordering::Relaxed),
                };
                tracing::error!("❌ Filter chain failed for {}: {}", filter_ctx.path(), err);
            }
        }

        let response = settle_response(&result, &mut filter_ctx);
        let extra = match &result {
            Ok(_) => filter_ctx.response_headers.clone(),
            Err(_) => HeaderMap::new(),
        };
        ctx.snapshot = Some(snapshot);
        ctx.filter_ctx = Some(filter_ctx);

        match response {
            Some(response) => {
                write_filter_response(session, response, &extra).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forwards the (possibly edited) request line and headers.
    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(filter_ctx) = &ctx.filter_ctx {
            if upstream_request.uri != filter_ctx.uri {
                upstream_request.set_uri(filter_ctx.uri.clone());
            }
            sync_request_headers(upstream_request, &filter_ctx.headers)?;
        }
        Ok(())
    }

    async fn upstream_response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(filter_ctx) = &ctx.filter_ctx {
            apply_response_headers(upstream_response, &filter_ctx.response_headers)?;
        }
        Ok(())
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let snapshot = match &ctx.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => self.state.snapshot(),
        };
        let upstream = &snapshot.config.upstream;

        let mut peer = Box::new(HttpPeer::new(
            upstream.address.as_str(),
            upstream.tls,
            upstream.sni.clone(),
        ));
        peer.options.connection_timeout =
            Some(Duration::from_millis(constants::timeout::CONNECTION_MS));
        peer.options.read_timeout = Some(Duration::from_secs(constants::timeout::READ_SECS));
        peer.options.write_timeout = Some(Duration::from_secs(constants::timeout::WRITE_SECS));

        Ok(peer)
    }

    /// Reports the final status to the filters that ran.
    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora::Error>,
        ctx: &mut Self::CTX,
    ) {
        self.state
            .metrics
            .total_requests
            .fetch_add(1, Ordering::Relaxed);

        let status = session
            .response_written()
            .map(|resp| resp.status)
            .unwrap_or(StatusCode::BAD_GATEWAY);
        if let Some(err) = e {
            tracing::warn!("⚠️ Upstream error ({}): {}", status.as_u16(), err);
        }

        if let (Some(snapshot), Some(filter_ctx)) = (&ctx.snapshot, &ctx.filter_ctx) {
            snapshot.chain.observe_response(ctx.invoked, filter_ctx, status);
        }
    }
}
