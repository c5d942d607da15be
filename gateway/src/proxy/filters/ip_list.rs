use super::trusted_proxy::TrustedProxies;
use super::Settings;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

pub const BLACKLIST: &str = "BLACKLIST";
pub const WHITELIST: &str = "WHITELIST";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpListSettings {
    pub ips: Vec<IpAddr>,
    /// See [`TrustedProxies::from_list`].
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Deny,
    Allow,
}

/// Client IP blacklist or whitelist. Rejected requests get 403.
///
/// A whitelist with no entries admits everyone; a request with no known client
/// address is denied by a whitelist and admitted by a blacklist.
pub struct IpListFilter {
    mode: Mode,
    settings: Settings<IpListSettings>,
    ips: HashSet<IpAddr>,
    proxies: TrustedProxies,
}

pub fn new_blacklist(params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(IpListFilter::new(Mode::Deny, BLACKLIST, params))
}

pub fn new_whitelist(params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(IpListFilter::new(Mode::Allow, WHITELIST, params))
}

impl IpListFilter {
    fn new(mode: Mode, name: &'static str, params: &FilterParams) -> Self {
        let settings = Settings::<IpListSettings>::parse(name, params);
        let (ips, proxies) = match settings.get() {
            Ok(s) => (
                s.ips.iter().copied().collect(),
                TrustedProxies::from_list(&s.trusted_proxies),
            ),
            Err(_) => (HashSet::new(), TrustedProxies::from_list(&[])),
        };
        Self {
            mode,
            settings,
            ips,
            proxies,
        }
    }
}

#[async_trait]
impl Filter for IpListFilter {
    fn name(&self) -> &str {
        match self.mode {
            Mode::Deny => BLACKLIST,
            Mode::Allow => WHITELIST,
        }
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        self.settings.get()?;

        let client_ip = self.proxies.effective_client_ip(ctx);
        let listed = client_ip.map(|ip| self.ips.contains(&ip)).unwrap_or(false);

        let denied = match self.mode {
            Mode::Deny => listed,
            Mode::Allow => !self.ips.is_empty() && !listed,
        };

        if denied {
            let client = client_ip.map(|ip| ip.to_string()).unwrap_or_default();
            match self.mode {
                Mode::Deny => tracing::warn!("⛔ Access Denied (IP Blocked): {} -> {}", client, ctx.path()),
                Mode::Allow => {
                    tracing::warn!("⛔ Access Denied (IP Not Allowed): {} -> {}", client, ctx.path())
                }
            }
            return Ok(ctx.reject(StatusCode::FORBIDDEN, "Forbidden"));
        }

        Ok(FilterAction::Continue)
    }
}
