/// Network Configuration
pub mod network {
    pub const PROXY_LISTEN: &str = "0.0.0.0:8080";
    pub const ADMIN_LISTEN: &str = "0.0.0.0:81";
    pub const UPSTREAM: &str = "127.0.0.1:3000";
}

/// Timeouts (milliseconds/seconds)
pub mod timeout {
    pub const REQUEST_MS: u64 = 30_000;
    pub const CONNECTION_MS: u64 = 500;
    pub const READ_SECS: u64 = 10;
    pub const WRITE_SECS: u64 = 5;
}

/// Environment variables
pub mod env {
    pub const CONFIG_PATH: &str = "GATEWAY_CONFIG";
    pub const ADMIN_SECRET: &str = "GATEWAY_ADMIN_SECRET";
    pub const LOG_DIR: &str = "GATEWAY_LOG_DIR";
}

pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.json";
