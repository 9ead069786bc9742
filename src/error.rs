//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::remote::{ConnectError, RemoteError};
use crate::remote_path::PathError;
use crate::vault::VaultError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
    /// 打开远端会话时的传输或连接失败。
    UpstreamUnavailable(String),
    /// 连接成功后远端拒绝了操作。
    OperationFailed(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) | ApiError::OperationFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Internal(msg)
            | ApiError::UpstreamUnavailable(msg)
            | ApiError::OperationFailed(msg) => msg,
        }
    }

    /// 以操作名包装远端错误。
    pub fn operation(context: &str, err: RemoteError) -> Self {
        ApiError::OperationFailed(format!("{context}: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<PathError> for ApiError {
    fn from(error: PathError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl From<ConnectError> for ApiError {
    fn from(error: ConnectError) -> Self {
        ApiError::UpstreamUnavailable(format!("SFTP connection error: {error}"))
    }
}

impl From<VaultError> for ApiError {
    fn from(error: VaultError) -> Self {
        match error {
            VaultError::Missing => {
                ApiError::Unauthorized("credentials expired, log in again".into())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_json_error_body() {
        let response = ApiError::BadRequest("Invalid request".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid request");
    }

    #[test]
    fn connect_failures_surface_as_bad_gateway() {
        let err: ApiError = ConnectError::Transport("connection refused".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.message().contains("connection refused"));
    }
}
