use super::{Filter, FilterParams};
use crate::proxy::filters;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a built-in filter. Never fails; bad parameters surface when the
/// filter first runs.
pub type Constructor = fn(&FilterParams) -> Arc<dyn Filter>;

/// The closed set of filter kinds compiled into the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    HttpAccess,
    Header,
    XForward,
    BlackList,
    WhiteList,
    Analysis,
    RateLimiting,
    CircuitBreake,
    Validation,
    Auth,
}

impl BuiltinKind {
    pub const ALL: [BuiltinKind; 10] = [
        BuiltinKind::HttpAccess,
        BuiltinKind::Header,
        BuiltinKind::XForward,
        BuiltinKind::BlackList,
        BuiltinKind::WhiteList,
        BuiltinKind::Analysis,
        BuiltinKind::RateLimiting,
        BuiltinKind::CircuitBreake,
        BuiltinKind::Validation,
        BuiltinKind::Auth,
    ];

    /// Canonical (uppercase) identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinKind::HttpAccess => "HTTP-ACCESS",
            BuiltinKind::Header => "HEAD",
            BuiltinKind::XForward => "XFORWARD",
            BuiltinKind::BlackList => "BLACKLIST",
            BuiltinKind::WhiteList => "WHITELIST",
            BuiltinKind::Analysis => "ANALYSIS",
            BuiltinKind::RateLimiting => "RATE-LIMITING",
            BuiltinKind::CircuitBreake => "CIRCUIT-BREAKE",
            BuiltinKind::Validation => "VALIDATION",
            BuiltinKind::Auth => "AUTH",
        }
    }

    fn constructor(&self) -> Constructor {
        match self {
            BuiltinKind::HttpAccess => filters::access::new_filter,
            BuiltinKind::Header => filters::headers::new_filter,
            BuiltinKind::XForward => filters::xforward::new_filter,
            BuiltinKind::BlackList => filters::ip_list::new_blacklist,
            BuiltinKind::WhiteList => filters::ip_list::new_whitelist,
            BuiltinKind::Analysis => filters::analysis::new_filter,
            BuiltinKind::RateLimiting => filters::rate_limit::new_filter,
            BuiltinKind::CircuitBreake => filters::circuit_breaker::new_filter,
            BuiltinKind::Validation => filters::validation::new_filter,
            BuiltinKind::Auth => filters::auth::new_filter,
        }
    }
}

impl fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier -> constructor table, built once and handed to the factory.
#[derive(Clone)]
pub struct BuiltinRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl BuiltinRegistry {
    pub fn standard() -> Self {
        let constructors = BuiltinKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), kind.constructor()))
            .collect();
        Self { constructors }
    }

    /// Looks up a name case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<Constructor> {
        self.constructors.get(name.to_uppercase().as_str()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.constructors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
