use super::trusted_proxy::TrustedProxies;
use super::Settings;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::header::HeaderValue;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;

pub const NAME: &str = "XFORWARD";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XForwardSettings {
    /// Peers allowed to pass `X-Forwarded-For` through. Empty means loopback
    /// plus `GATEWAY_TRUSTED_PROXY_IPS`.
    pub trusted_proxies: Vec<IpAddr>,
}

/// Appends the peer address to `X-Forwarded-For` and sets `X-Real-IP`.
///
/// An inbound `X-Forwarded-For` from an untrusted peer is discarded rather than
/// extended.
pub struct XForwardForFilter {
    settings: Settings<XForwardSettings>,
    proxies: TrustedProxies,
}

pub fn new_filter(params: &FilterParams) -> Arc<dyn Filter> {
    let settings = Settings::<XForwardSettings>::parse(NAME, params);
    let proxies = TrustedProxies::from_list(
        settings
            .get()
            .map(|s| s.trusted_proxies.as_slice())
            .unwrap_or_default(),
    );
    Arc::new(XForwardForFilter { settings, proxies })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, FilterError> {
    HeaderValue::from_str(value).map_err(|e| FilterError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Filter for XForwardForFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        self.settings.get()?;

        let Some(peer) = ctx.client_addr else {
            return Ok(FilterAction::Continue);
        };
        let real_ip = self.proxies.effective_client_ip(ctx).unwrap_or(peer);

        let forwarded_for = match ctx.header_str("x-forwarded-for") {
            Some(existing) if self.proxies.is_trusted_hop(ctx) && !existing.trim().is_empty() => {
                format!("{}, {}", existing.trim(), peer)
            }
            _ => peer.to_string(),
        };

        let forwarded_for = header_value("x-forwarded-for", &forwarded_for)?;
        let real_ip = header_value("x-real-ip", &real_ip.to_string())?;
        ctx.headers.insert("x-forwarded-for", forwarded_for);
        ctx.headers.insert("x-real-ip", real_ip);

        Ok(FilterAction::Continue)
    }
}
