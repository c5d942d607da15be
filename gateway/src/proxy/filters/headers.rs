use super::Settings;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NAME: &str = "HEAD";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderSettings {
    /// Request headers to set (replacing existing values).
    pub request_set: BTreeMap<String, String>,
    /// Request headers to drop before forwarding.
    pub request_remove: Vec<String>,
    /// Headers added to the client response.
    pub response_set: BTreeMap<String, String>,
}

/// Rewrites request headers and adds response headers.
pub struct HeadersFilter {
    settings: Settings<HeaderSettings>,
}

pub fn new_filter(params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(HeadersFilter {
        settings: Settings::parse(NAME, params),
    })
}

fn set_all(target: &mut HeaderMap, values: &BTreeMap<String, String>) -> Result<(), FilterError> {
    for (name, value) in values {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| FilterError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| FilterError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        target.insert(header_name, header_value);
    }
    Ok(())
}

#[async_trait]
impl Filter for HeadersFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        let settings = self.settings.get()?;

        for name in &settings.request_remove {
            ctx.headers.remove(name.as_str());
        }
        set_all(&mut ctx.headers, &settings.request_set)?;
        set_all(&mut ctx.response_headers, &settings.response_set)?;

        Ok(FilterAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::{from_ip, params, with_header};
    use serde_json::json;

    #[tokio::test]
    async fn applies_request_and_response_edits() {
        let filter = new_filter(&params(json!({
            "request_set": { "x-gateway": "on" },
            "request_remove": ["cookie"],
            "response_set": { "x-served-by": "gateway" }
        })));
        let mut ctx = with_header(from_ip("192.0.2.1"), "cookie", "a=b");

        assert_eq!(filter.process(&mut ctx).await.unwrap(), FilterAction::Continue);
        assert_eq!(ctx.header_str("x-gateway"), Some("on"));
        assert!(ctx.headers.get("cookie").is_none());
        assert_eq!(ctx.response_headers["x-served-by"], "gateway");
    }

    #[tokio::test]
    async fn invalid_header_name_is_a_request_error() {
        let filter = new_filter(&params(json!({ "request_set": { "bad header": "x" } })));
        let err = filter.process(&mut from_ip("192.0.2.1")).await.unwrap_err();
        assert!(matches!(err, FilterError::InvalidHeader { .. }));
    }

    #[tokio::test]
    async fn unknown_parameter_reports_misconfiguration() {
        let filter = new_filter(&params(json!({ "rewrite": true })));
        let err = filter.process(&mut from_ip("192.0.2.1")).await.unwrap_err();
        assert!(matches!(err, FilterError::Misconfigured { .. }));
    }
}
