use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use taskrelay_core::config::AuthConfig;
use tracing::warn;

use crate::error::ApiError;
use crate::routes::AppState;

pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Malformed authorization header")]
    MalformedHeader,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("Authentication token has expired")]
    ExpiredToken,
}

/// HS256 令牌校验
pub struct JwtService {
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })
    }
}

/// 认证状态
pub struct Authenticator {
    enabled: bool,
    jwt: JwtService,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            enabled: config.enabled,
            jwt: JwtService::new(&config.jwt_secret),
        }
    }

    /// 从请求头解析调用者；认证关闭时不要求令牌
    pub fn resolve(&self, parts: &Parts) -> Result<Option<String>, AuthError> {
        if !self.enabled {
            return Ok(None);
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?;
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .ok_or(AuthError::MalformedHeader)?;

        let claims = self.jwt.validate_token(token.trim())?;
        Ok(Some(claims.sub))
    }
}

/// 当前调用者ID，认证关闭时为空
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Option<String>);

impl CurrentActor {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match state.auth.resolve(parts) {
            Ok(actor) => Ok(CurrentActor(actor)),
            Err(err) => {
                warn!("Authentication failed: {}", err);
                Err(ApiError::Authentication(err))
            }
        }
    }
}
