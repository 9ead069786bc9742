//! 登录与请求认证：令牌签发、Bearer 校验与身份绑定。

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, FromRequestParts, Json};
use axum::http::Request;
use axum::http::request::Parts;
use axum::{body::Body as AxumBody, middleware, response::Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use axum_extra::typed_header::{TypedHeaderRejection, TypedHeaderRejectionReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::remote::{ConnectError, SessionFactory};
use crate::token::TokenService;
use crate::vault::{CredentialVault, Secret};

#[derive(Debug)]
pub struct AuthConfig {
    pub tokens: TokenService,
    pub vault: CredentialVault,
}

/// 由 [`auth_middleware`] 绑定到请求上的身份。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("User not authenticated".into()))
    }
}

/// 认证中间件：校验 Bearer 令牌并发布身份。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if is_auth_exempt_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let TypedHeader(Authorization(bearer)) = auth_header.map_err(|rejection| {
        match rejection.reason() {
            TypedHeaderRejectionReason::Missing => {
                ApiError::Unauthorized("Authorization header required".into())
            }
            _ => ApiError::Unauthorized("Invalid authorization format".into()),
        }
    })?;

    let claims = auth.tokens.verify(bearer.token()).map_err(|err| {
        debug!(error = %err, "token rejected");
        ApiError::Unauthorized("Invalid token".into())
    })?;

    req.extensions_mut().insert(AuthenticatedUser {
        username: claims.username,
    });
    Ok(next.run(req).await)
}

fn is_auth_exempt_path(path: &str) -> bool {
    if path == "/api/login" || path == "/api/version" {
        return true;
    }
    !path.starts_with("/api/")
}

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
pub(crate) struct LoginResponse {
    token: String,
}

/// 登录接口：以远端 SFTP 凭据校验身份并签发令牌。
pub async fn auth_login(
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Ok(Json(LoginRequest { username, password })) = payload else {
        return Err(ApiError::BadRequest("Invalid request".into()));
    };
    if username.trim().is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest("Invalid request".into()));
    }
    let secret = Secret::new(password);

    if let Err(err) = factory.test_only(&username, &secret).await {
        match err {
            ConnectError::AuthRejected => warn!(username, "login rejected by remote server"),
            ConnectError::Transport(ref reason) => {
                warn!(username, error = %reason, "login failed to reach remote server")
            }
        }
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let issued = auth.tokens.issue(&username).map_err(|err| {
        warn!(error = %err, "token signing failed");
        ApiError::Internal("Failed to generate token".into())
    })?;
    auth.vault
        .store(&username, &secret, issued.expires_at)
        .await?;

    info!(username, "login succeeded");
    Ok(Json(LoginResponse {
        token: issued.token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_login_and_version_are_exempt() {
        assert!(is_auth_exempt_path("/api/login"));
        assert!(is_auth_exempt_path("/api/version"));
        assert!(!is_auth_exempt_path("/api/files"));
        assert!(!is_auth_exempt_path("/api/files/docs"));
        assert!(!is_auth_exempt_path("/api/move"));
    }
}
