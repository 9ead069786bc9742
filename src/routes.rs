//! 路由装配：公开接口、受保护的文件接口与共享层。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post, put};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::auth::{self, AuthConfig};
use crate::error::ApiError;
use crate::remote::SessionFactory;
use crate::{files, http, version};

/// 构建 `/api` 路由，并挂载认证与共享状态。
pub fn build_router(
    auth_config: Arc<AuthConfig>,
    factory: Arc<dyn SessionFactory>,
    upload_max_size: u64,
) -> Router {
    let upload_limit = if upload_max_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(usize::try_from(upload_max_size).unwrap_or(usize::MAX))
    };

    Router::new()
        .route("/api/login", post(auth::auth_login))
        .route("/api/version", get(version::get_version_info))
        .route("/api/files", get(files::list_root))
        .route(
            "/api/files/{*path}",
            get(files::list_files).delete(files::delete_entry),
        )
        .route("/api/download/{*path}", get(files::download_file))
        .route("/api/upload", post(files::upload_root).layer(upload_limit))
        .route(
            "/api/upload/{*path}",
            post(files::upload_file).layer(upload_limit),
        )
        .route("/api/move", put(files::move_entry))
        .route("/api/rename", put(files::rename_entry))
        .route("/api/mkdir/{*path}", post(files::create_directory))
        .fallback(|| async { ApiError::NotFound("not found".into()) })
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(auth_config))
        .layer(Extension(factory))
}
