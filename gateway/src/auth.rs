use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants;

/// Secret for admin API tokens.
fn admin_secret() -> Vec<u8> {
    env::var(constants::env::ADMIN_SECRET)
        .unwrap_or_else(|_| "super_secret_key_change_me_in_production".to_string())
        .into_bytes()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer = 0,
    Operator = 1,
    Admin = 2,
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "operator" => Role::Operator,
            _ => Role::Viewer,
        }
    }
}

impl Claims {
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }

    /// Operators and admins may reload the filter chain.
    pub fn can_reload(&self) -> bool {
        self.role() >= Role::Operator
    }
}

#[derive(Debug)]
pub enum AuthError {
    TokenCreation,
    InvalidToken,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AuthError::TokenCreation => (StatusCode::INTERNAL_SERVER_ERROR, "Token creation error"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient role"),
        };
        let body = axum::Json(serde_json::json!({
            "error": error_message,
        }));
        (status, body).into_response()
    }
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

fn now_secs() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

/// Issues an HS256 token valid for `ttl_secs`.
pub fn create_jwt(secret: &[u8], sub: &str, role: &str, ttl_secs: usize) -> Result<String, AuthError> {
    let claims = Claims {
        sub: sub.to_owned(),
        exp: now_secs() + ttl_secs,
        role: role.to_owned(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|_| AuthError::TokenCreation)
}

pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}

/// Admin token using the configured admin secret.
pub fn create_admin_jwt(sub: &str, role: &str) -> Result<String, AuthError> {
    create_jwt(&admin_secret(), sub, role, 60 * 60 * 24)
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::InvalidToken)?;

        verify_jwt(&admin_secret(), bearer.token())
    }
}
