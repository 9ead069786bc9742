//! 会话令牌：HS256 签名的声明，表示用户名在 `iat` 时通过认证、在 `exp` 前有效。
//!
//! 令牌无状态，不支持吊销与刷新，到期前一直有效。

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// 新签发的令牌及其失效时间。
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

/// 使用进程级 HMAC 密钥签发与校验会话令牌。
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // 过期时间由 `verify_at` 按注入的时钟判断。
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// 生成 32 字节随机签名密钥。
    pub fn random_secret() -> Vec<u8> {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        secret
    }

    pub fn issue(&self, username: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(username, self.ttl, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        username: &str,
        ttl: Duration,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            username: username.to_string(),
            iat: now,
            exp: now.saturating_add(ttl_secs),
            jti: Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| TokenError::Signing(err.to_string()))?;
        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// 先校验签名，再解析声明并检查 `now < exp`。
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let Some((signed, signature)) = token.rsplit_once('.') else {
            return Err(TokenError::Malformed);
        };
        if signed.split('.').count() != 2 {
            return Err(TokenError::Malformed);
        }
        // 任意改动已签名内容都应判为签名无效，而非格式错误。
        match jsonwebtoken::crypto::verify(
            signature,
            signed.as_bytes(),
            &self.decoding,
            Algorithm::HS256,
        ) {
            Ok(true) => {}
            Ok(false) | Err(_) => return Err(TokenError::InvalidSignature),
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;
        if now >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        if data.claims.username.is_empty() {
            return Err(TokenError::Malformed);
        }
        Ok(data.claims)
    }
}
