use crate::filter::FilterContext;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

fn env_trusted_proxy_ips() -> &'static HashSet<IpAddr> {
    static TRUSTED_PROXY_IPS: OnceLock<HashSet<IpAddr>> = OnceLock::new();

    TRUSTED_PROXY_IPS.get_or_init(|| {
        let mut ips = HashSet::new();

        ips.insert(IpAddr::from([127, 0, 0, 1]));
        ips.insert(IpAddr::from([0, 0, 0, 0, 0, 0, 0, 1]));

        if let Ok(raw) = std::env::var("GATEWAY_TRUSTED_PROXY_IPS") {
            ips.extend(parse_ip_list(raw.split(',')));
        }

        ips
    })
}

/// Parses the comma-separated env list, logging and skipping invalid entries.
pub fn parse_ip_list<'a>(items: impl IntoIterator<Item = &'a str>) -> HashSet<IpAddr> {
    items
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|part| match part.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("Ignoring invalid IP address: {}", part);
                None
            }
        })
        .collect()
}

/// Peers whose `X-Forwarded-*` headers are believed.
#[derive(Debug, Clone)]
pub struct TrustedProxies {
    ips: HashSet<IpAddr>,
}

impl TrustedProxies {
    /// Uses `list` when given, otherwise loopback plus `GATEWAY_TRUSTED_PROXY_IPS`.
    pub fn from_list(list: &[IpAddr]) -> Self {
        if list.is_empty() {
            Self {
                ips: env_trusted_proxy_ips().clone(),
            }
        } else {
            Self {
                ips: list.iter().copied().collect(),
            }
        }
    }

    pub fn is_trusted_hop(&self, ctx: &FilterContext) -> bool {
        ctx.client_addr
            .map(|ip| self.ips.contains(&ip))
            .unwrap_or(false)
    }

    /// The first valid `X-Forwarded-For` entry when the peer is trusted,
    /// otherwise the peer address itself.
    pub fn effective_client_ip(&self, ctx: &FilterContext) -> Option<IpAddr> {
        if self.is_trusted_hop(ctx) {
            if let Some(forwarded_for) = ctx.header_str("x-forwarded-for") {
                for candidate in forwarded_for.split(',').map(str::trim) {
                    if let Ok(ip) = candidate.parse::<IpAddr>() {
                        return Some(ip);
                    }
                }
            }
        }

        ctx.client_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::{from_ip, with_header};

    #[test]
    fn untrusted_peer_cannot_spoof_client_ip() {
        let proxies = TrustedProxies::from_list(&["10.0.0.1".parse().unwrap()]);
        let ctx = with_header(from_ip("203.0.113.9"), "x-forwarded-for", "1.2.3.4");

        assert_eq!(
            proxies.effective_client_ip(&ctx),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn trusted_peer_forwards_first_valid_entry() {
        let proxies = TrustedProxies::from_list(&["10.0.0.1".parse().unwrap()]);
        let ctx = with_header(from_ip("10.0.0.1"), "x-forwarded-for", "junk, 1.2.3.4, 5.6.7.8");

        assert_eq!(
            proxies.effective_client_ip(&ctx),
            Some("1.2.3.4".parse().unwrap())
        );
    }

    #[test]
    fn loopback_is_trusted_by_default() {
        let proxies = TrustedProxies::from_list(&[]);
        assert!(proxies.is_trusted_hop(&from_ip("127.0.0.1")));
        assert!(proxies.is_trusted_hop(&from_ip("::1")));
        assert!(!proxies.is_trusted_hop(&from_ip("10.0.0.1")));
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let ips = parse_ip_list(["10.0.0.1", " ", "not-an-ip", "::1"]);
        assert_eq!(ips.len(), 2);
    }
}
