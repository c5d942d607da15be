pub mod loader;

pub use loader::ConfigLoader;

use crate::constants;
use crate::filter::FilterSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub address: String,
    #[serde(default)]
    pub tls: bool,
    /// SNI / Host for TLS upstreams.
    #[serde(default)]
    pub sni: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: constants::network::UPSTREAM.to_string(),
            tls: false,
            sni: String::new(),
        }
    }
}

fn default_listen() -> String {
    constants::network::PROXY_LISTEN.to_string()
}

fn default_admin_listen() -> String {
    constants::network::ADMIN_LISTEN.to_string()
}

fn default_request_timeout_ms() -> u64 {
    constants::timeout::REQUEST_MS
}

/// Gateway configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Per-request budget for the filter chain. Zero disables the deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            upstream: UpstreamConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
            filters: Vec::new(),
        }
    }
}
