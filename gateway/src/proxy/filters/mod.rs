//! Built-in filters. Each module exposes a constructor registered in
//! [`BuiltinRegistry`](crate::filter::BuiltinRegistry).

use crate::filter::{FilterError, FilterParams};
use serde::de::DeserializeOwned;

pub mod access;
pub mod analysis;
pub mod auth;
pub mod circuit_breaker;
pub mod headers;
pub mod ip_list;
pub mod rate_limit;
pub mod trusted_proxy;
pub mod validation;
pub mod xforward;

/// Parsed filter parameters, or the reason they could not be parsed.
///
/// Construction never fails; a filter holding a parse error reports it from
/// every `process` call instead.
#[derive(Debug)]
pub(crate) struct Settings<T> {
    filter: &'static str,
    parsed: Result<T, String>,
}

impl<T: DeserializeOwned + Default> Settings<T> {
    pub(crate) fn parse(filter: &'static str, params: &FilterParams) -> Self {
        let parsed = if params.is_empty() {
            Ok(T::default())
        } else {
            serde_json::from_value(serde_json::Value::Object(params.clone()))
                .map_err(|e| e.to_string())
        };
        if let Err(reason) = &parsed {
            tracing::warn!("⚠️ {} parameters rejected: {}", filter, reason);
        }
        Self { filter, parsed }
    }
}

impl<T> Settings<T> {
    pub(crate) fn get(&self) -> Result<&T, FilterError> {
        self.parsed
            .as_ref()
            .map_err(|reason| FilterError::Misconfigured {
                filter: self.filter.to_string(),
                reason: reason.clone(),
            })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::filter::{FilterContext, FilterParams};
    use http::{HeaderValue, Method, Uri};
    use std::net::IpAddr;

    pub fn params(value: serde_json::Value) -> FilterParams {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("parameters must be an object, got {other}"),
        }
    }

    pub fn request(method: Method, uri: &str) -> FilterContext {
        FilterContext::new(method, uri.parse::<Uri>().unwrap())
    }

    pub fn from_ip(ip: &str) -> FilterContext {
        request(Method::GET, "/").with_client_addr(ip.parse::<IpAddr>().unwrap())
    }

    pub fn with_header(mut ctx: FilterContext, name: &'static str, value: &str) -> FilterContext {
        ctx.headers
            .insert(name, HeaderValue::from_str(value).unwrap());
        ctx
    }
}
