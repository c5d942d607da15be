use super::Settings;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams};
use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

pub const NAME: &str = "VALIDATION";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Allowed methods (case-insensitive). Empty allows all.
    pub methods: Vec<String>,
    /// Longest accepted request target, in bytes. Zero disables the check.
    pub max_uri_length: usize,
    /// Headers every request must carry.
    pub required_headers: Vec<String>,
}

/// Rejects malformed requests before they reach the upstream.
pub struct ValidationFilter {
    settings: Settings<ValidationSettings>,
}

pub fn new_filter(params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(ValidationFilter {
        settings: Settings::parse(NAME, params),
    })
}

#[async_trait]
impl Filter for ValidationFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        let settings = self.settings.get()?;

        if !settings.methods.is_empty()
            && !settings
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(ctx.method.as_str()))
        {
            return Ok(ctx.reject(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
        }

        if settings.max_uri_length > 0 {
            let target_len = ctx
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().len())
                .unwrap_or(0);
            if target_len > settings.max_uri_length {
                return Ok(ctx.reject(StatusCode::URI_TOO_LONG, "URI Too Long"));
            }
        }

        if let Some(missing) = settings
            .required_headers
            .iter()
            .find(|h| !ctx.headers.contains_key(h.as_str()))
        {
            let message = format!("Missing required header: {}", missing);
            return Ok(ctx.reject(StatusCode::BAD_REQUEST, &message));
        }

        Ok(FilterAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::{params, request, with_header};
    use http::Method;
    use serde_json::json;

    fn filter() -> Arc<dyn Filter> {
        new_filter(&params(json!({
            "methods": ["get", "POST"],
            "max_uri_length": 16,
            "required_headers": ["x-request-id"]
        })))
    }

    fn rejected_with(ctx: &FilterContext) -> StatusCode {
        ctx.response.as_ref().expect("rejected").status
    }

    #[tokio::test]
    async fn accepts_valid_request() {
        let mut ctx = with_header(request(Method::GET, "/ok"), "x-request-id", "1");
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Continue);
    }

    #[tokio::test]
    async fn rejects_disallowed_method() {
        let mut ctx = with_header(request(Method::DELETE, "/ok"), "x-request-id", "1");
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Halt);
        assert_eq!(rejected_with(&ctx), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn rejects_long_uri() {
        let mut ctx = with_header(
            request(Method::GET, "/a/very/long/path?with=query"),
            "x-request-id",
            "1",
        );
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Halt);
        assert_eq!(rejected_with(&ctx), StatusCode::URI_TOO_LONG);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let mut ctx = request(Method::POST, "/ok");
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Halt);
        assert_eq!(rejected_with(&ctx), StatusCode::BAD_REQUEST);
    }
}
