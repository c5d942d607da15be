use super::Settings;
use crate::auth;
use crate::filter::{Filter, FilterAction, FilterContext, FilterError, FilterParams, FilterResponse};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use http::header::{HeaderValue, WWW_AUTHENTICATE};
use http::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const NAME: &str = "AUTH";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSettings {
    pub realm: String,
    /// Basic auth users: username -> bcrypt hash.
    pub users: HashMap<String, String>,
    /// HS256 secret for Bearer tokens. Bearer auth is off when unset.
    pub jwt_secret: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            realm: "Restricted Area".to_string(),
            users: HashMap::new(),
            jwt_secret: None,
        }
    }
}

/// Requires HTTP Basic or Bearer JWT credentials.
///
/// The authenticated subject is recorded as the `auth.subject` annotation.
pub struct AuthFilter {
    settings: Settings<AuthSettings>,
}

pub fn new_filter(params: &FilterParams) -> Arc<dyn Filter> {
    Arc::new(AuthFilter {
        settings: Settings::parse(NAME, params),
    })
}

/// Splits `value` into its scheme, matched case-insensitively, and the
/// credentials that follow.
fn credentials<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (given, rest) = value.split_once(' ')?;
    given.eq_ignore_ascii_case(scheme).then_some(rest)
}

/// Checks Basic credentials. The bcrypt comparison runs on the blocking pool.
async fn basic_subject(settings: &AuthSettings, encoded: &str) -> Result<Option<String>, FilterError> {
    let Some(decoded) = general_purpose::STANDARD.decode(encoded.trim()).ok() else {
        return Ok(None);
    };
    let Ok(creds) = String::from_utf8(decoded) else {
        return Ok(None);
    };
    let Some((username, password)) = creds.split_once(':') else {
        return Ok(None);
    };
    let Some(hash) = settings.users.get(username).cloned() else {
        return Ok(None);
    };

    let password = password.to_string();
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .map_err(|e| FilterError::internal(format!("password check failed: {}", e)))?;
    Ok(verified.then(|| username.to_string()))
}

fn bearer_subject(settings: &AuthSettings, token: &str) -> Option<String> {
    let secret = settings.jwt_secret.as_ref()?;
    auth::verify_jwt(secret.as_bytes(), token.trim())
        .ok()
        .map(|claims| claims.sub)
}

#[async_trait]
impl Filter for AuthFilter {
    fn name(&self) -> &str {
        NAME
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        let settings = self.settings.get()?;
        if settings.users.is_empty() && settings.jwt_secret.is_none() {
            return Err(FilterError::Misconfigured {
                filter: NAME.to_string(),
                reason: "neither users nor jwt_secret configured".to_string(),
            });
        }

        let header = ctx.header_str("authorization").unwrap_or_default();
        let subject = if let Some(encoded) = credentials(header, "Basic") {
            basic_subject(settings, encoded).await?
        } else if let Some(token) = credentials(header, "Bearer") {
            bearer_subject(settings, token)
        } else {
            None
        };

        if let Some(subject) = subject {
            ctx.annotate("auth.subject", subject);
            return Ok(FilterAction::Continue);
        }

        tracing::info!("🔒 Authentication required for {}", ctx.path());
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", settings.realm))
            .map_err(|e| FilterError::InvalidHeader {
                name: WWW_AUTHENTICATE.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ctx.respond(
            FilterResponse::new(StatusCode::UNAUTHORIZED)
                .with_header(WWW_AUTHENTICATE, challenge)
                .with_body("Unauthorized"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::filters::test_support::{params, request, with_header};
    use http::Method;
    use serde_json::json;

    fn basic(user: &str, password: &str) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{user}:{password}"))
        )
    }

    fn filter() -> Arc<dyn Filter> {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        new_filter(&params(json!({
            "users": { "alice": hash },
            "jwt_secret": "s3cret"
        })))
    }

    #[tokio::test]
    async fn accepts_valid_basic_credentials() {
        let mut ctx = with_header(request(Method::GET, "/"), "authorization", &basic("alice", "hunter2"));
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Continue);
        assert_eq!(ctx.annotations["auth.subject"], "alice");
    }

    #[tokio::test]
    async fn rejects_wrong_password_with_challenge() {
        let mut ctx = with_header(request(Method::GET, "/"), "authorization", &basic("alice", "nope"));
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Halt);

        let response = ctx.response.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers[WWW_AUTHENTICATE],
            "Basic realm=\"Restricted Area\""
        );
    }

    #[tokio::test]
    async fn accepts_bearer_token() {
        let token = auth::create_jwt(b"s3cret", "svc", "viewer", 60).unwrap();
        let mut ctx = with_header(
            request(Method::GET, "/"),
            "authorization",
            &format!("Bearer {token}"),
        );
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Continue);
        assert_eq!(ctx.annotations["auth.subject"], "svc");
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let lower = basic("alice", "hunter2").replacen("Basic", "basic", 1);
        let mut ctx = with_header(request(Method::GET, "/"), "authorization", &lower);
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Continue);

        let token = auth::create_jwt(b"s3cret", "svc", "viewer", 60).unwrap();
        let mut ctx = with_header(
            request(Method::GET, "/"),
            "authorization",
            &format!("BEARER {token}"),
        );
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Continue);
    }

    #[tokio::test]
    async fn password_check_yields_to_deadline() {
        use crate::filter::{ChainError, FilterChain, FilterFactory, FilterSpec};
        use std::time::Duration;
        use tokio::time::Instant;

        let hash = bcrypt::hash("hunter2", 13).unwrap();
        let spec = FilterSpec::builtin(NAME).with_parameters(params(json!({ "users": { "alice": hash } })));
        let chain = FilterChain::build(&FilterFactory::standard(), &[spec]).unwrap();

        let mut ctx = with_header(request(Method::GET, "/"), "authorization", &basic("alice", "hunter2"))
            .with_deadline(Instant::now() + Duration::from_millis(20));
        let err = chain.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ChainError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn missing_credentials_halt() {
        let mut ctx = request(Method::GET, "/");
        assert_eq!(filter().process(&mut ctx).await.unwrap(), FilterAction::Halt);
    }

    #[tokio::test]
    async fn unconfigured_filter_errors() {
        let filter = new_filter(&FilterParams::new());
        let err = filter.process(&mut request(Method::GET, "/")).await.unwrap_err();
        assert!(matches!(err, FilterError::Misconfigured { .. }));
    }
}
