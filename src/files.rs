//! 文件列表、下载、上传、删除、移动与目录操作处理器。
//!
//! 每个处理器为当前用户打开且仅打开一个远端会话，完成操作后在响应前释放；
//! 下载则由响应流持有会话直至传输结束。

use axum::body::Body as AxumBody;
use axum::extract::multipart::Field;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::auth::{AuthConfig, AuthenticatedUser};
use crate::error::ApiError;
use crate::remote::{
    RemoteEntry, RemoteMetadata, RemoteReader, RemoteSession, SessionFactory, SessionGuard,
    SessionReader, create_dir_all, remove_tree,
};
use crate::remote_path;

/// 列表中单个条目的元数据。
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub mod_time: Option<String>,
    pub path: String,
}

#[derive(Deserialize)]
pub(crate) struct MoveRequest {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

#[derive(Deserialize)]
pub(crate) struct RenameRequest {
    #[serde(default)]
    path: String,
    #[serde(default)]
    new_name: String,
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    message: &'static str,
    path: String,
}

#[derive(Serialize)]
pub(crate) struct RenameResponse {
    message: &'static str,
    new_path: String,
}

/// 取出用户缓存的凭据并打开其远端会话。
async fn open_session(
    auth: &AuthConfig,
    factory: &dyn SessionFactory,
    user: &AuthenticatedUser,
) -> Result<SessionGuard, ApiError> {
    let secret = auth
        .vault
        .resolve(&user.username, Utc::now().timestamp())
        .await?;
    Ok(SessionGuard::acquire(factory, &user.username, &secret).await?)
}

fn project_entry(parent: &str, entry: RemoteEntry) -> FileInfo {
    let mod_time = entry.metadata.modified.map(|ts| {
        let datetime: DateTime<Utc> = ts.into();
        datetime.to_rfc3339_opts(SecondsFormat::Secs, true)
    });
    FileInfo {
        path: remote_path::join(parent, &entry.name),
        name: entry.name,
        size: entry.metadata.size,
        is_dir: entry.metadata.is_dir,
        mod_time,
    }
}

async fn list_at(session: &dyn RemoteSession, path: &str) -> Result<Vec<FileInfo>, ApiError> {
    let entries = session
        .read_dir(path)
        .await
        .map_err(|err| ApiError::operation("Failed to read directory", err))?;
    let mut files: Vec<FileInfo> = entries
        .into_iter()
        .map(|entry| project_entry(path, entry))
        .collect();
    files.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
    Ok(files)
}

/// 列出目录内容。
pub async fn list_files(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    Path(raw): Path<String>,
) -> Result<JsonResponse<Vec<FileInfo>>, ApiError> {
    list_directory(&user, &auth, factory.as_ref(), &raw).await
}

/// 列出根目录。
pub async fn list_root(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
) -> Result<JsonResponse<Vec<FileInfo>>, ApiError> {
    list_directory(&user, &auth, factory.as_ref(), "/").await
}

async fn list_directory(
    user: &AuthenticatedUser,
    auth: &AuthConfig,
    factory: &dyn SessionFactory,
    raw: &str,
) -> Result<JsonResponse<Vec<FileInfo>>, ApiError> {
    let path = remote_path::normalize(raw)?;
    let session = open_session(auth, factory, user).await?;
    let result = list_at(&*session, &path).await;
    session.release().await;
    let files = result?;
    info!(
        username = user.username,
        path,
        count = files.len(),
        "list files"
    );
    Ok(JsonResponse(files))
}

fn attachment_disposition(path: &str) -> Result<HeaderValue, ApiError> {
    let name = remote_path::base_name(path)
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
        .map_err(|_| ApiError::Internal("响应头构建失败".into()))
}

/// 下载文件：以二进制附件流式返回。
pub async fn download_file(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let path = remote_path::normalize(&raw)?;
    let session = open_session(&auth, factory.as_ref(), &user).await?;

    let opened: Result<(RemoteMetadata, RemoteReader), ApiError> = async {
        let metadata = session
            .stat(&path)
            .await
            .map_err(|err| ApiError::operation("Failed to get file info", err))?;
        if metadata.is_dir {
            return Err(ApiError::BadRequest("path is not a file".into()));
        }
        let reader = session
            .open_read(&path)
            .await
            .map_err(|err| ApiError::operation("Failed to open file", err))?;
        Ok((metadata, reader))
    }
    .await;
    let (metadata, reader) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            session.release().await;
            return Err(err);
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        "content-description",
        HeaderValue::from_static("File Transfer"),
    );
    headers.insert(
        "content-transfer-encoding",
        HeaderValue::from_static("binary"),
    );
    headers.insert(header::CONTENT_DISPOSITION, attachment_disposition(&path)?);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.size));
    if let Some(modified) = metadata.modified
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    info!(
        username = user.username,
        path,
        size = metadata.size,
        "download file"
    );
    let stream = ReaderStream::new(SessionReader::new(reader, session));
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

async fn write_field(
    session: &dyn RemoteSession,
    dest: &str,
    mut field: Field<'_>,
) -> Result<u64, ApiError> {
    let mut writer = session
        .create(dest)
        .await
        .map_err(|err| ApiError::operation("Failed to create remote file", err))?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Failed to read upload: {err}")))?
    {
        writer
            .write_all(&chunk)
            .await
            .map_err(|err| ApiError::operation("Failed to copy file content", err.into()))?;
        written += chunk.len() as u64;
    }
    writer
        .shutdown()
        .await
        .map_err(|err| ApiError::operation("Failed to copy file content", err.into()))?;
    Ok(written)
}

/// 上传文件到目标目录（multipart `file` 字段）。
pub async fn upload_file(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    Path(raw): Path<String>,
    multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    upload_into(&user, &auth, factory.as_ref(), &raw, multipart).await
}

/// 上传文件到根目录。
pub async fn upload_root(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    upload_into(&user, &auth, factory.as_ref(), "/", multipart).await
}

async fn upload_into(
    user: &AuthenticatedUser,
    auth: &AuthConfig,
    factory: &dyn SessionFactory,
    raw: &str,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let dir = remote_path::normalize(raw)?;
    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|_| ApiError::BadRequest("Failed to parse form".into()))?
        {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(ApiError::BadRequest("Failed to get file from form".into())),
        }
    };
    let file_name = remote_path::upload_file_name(field.file_name().unwrap_or_default())?;
    let dest = remote_path::join(&dir, file_name);

    let session = open_session(auth, factory, user).await?;
    let result = write_field(&*session, &dest, field).await;
    session.release().await;
    let written = result?;

    info!(username = user.username, path = dest, size = written, "upload file");
    Ok(JsonResponse(UploadResponse {
        message: "File uploaded successfully",
        path: dest,
    }))
}

async fn delete_at(session: &dyn RemoteSession, path: &str) -> Result<(), ApiError> {
    let metadata = session
        .lstat(path)
        .await
        .map_err(|err| ApiError::operation("Failed to get file info", err))?;
    let removed = if metadata.is_dir && !metadata.is_symlink {
        debug!(path, "removing directory tree");
        remove_tree(session, path).await
    } else {
        session.remove_file(path).await
    };
    removed.map_err(|err| ApiError::operation("Failed to delete", err))
}

/// 删除文件或目录（目录递归删除，遇错即停）。
pub async fn delete_entry(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    Path(raw): Path<String>,
) -> Result<JsonResponse<MessageResponse>, ApiError> {
    let path = remote_path::normalize(&raw)?;
    if path == "/" {
        return Err(ApiError::BadRequest("cannot delete the root directory".into()));
    }
    let session = open_session(&auth, factory.as_ref(), &user).await?;
    let result = delete_at(&*session, &path).await;
    session.release().await;
    result?;
    info!(username = user.username, path, "delete entry");
    Ok(JsonResponse(MessageResponse {
        message: "Deleted successfully",
    }))
}

async fn rename_path(
    user: &AuthenticatedUser,
    auth: &AuthConfig,
    factory: &dyn SessionFactory,
    from: &str,
    to: &str,
    context: &str,
) -> Result<(), ApiError> {
    let session = open_session(auth, factory, user).await?;
    let result = session
        .rename(from, to)
        .await
        .map_err(|err| ApiError::operation(context, err));
    session.release().await;
    result
}

/// 移动文件或目录。
pub async fn move_entry(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<JsonResponse<MessageResponse>, ApiError> {
    let Ok(Json(MoveRequest {
        source,
        destination,
    })) = payload
    else {
        return Err(ApiError::BadRequest("Invalid request".into()));
    };
    if source.is_empty() || destination.is_empty() {
        return Err(ApiError::BadRequest("Invalid request".into()));
    }
    let source = remote_path::normalize(&source)?;
    let destination = remote_path::normalize(&destination)?;
    if source == "/" || destination == "/" {
        return Err(ApiError::BadRequest("cannot move the root directory".into()));
    }

    rename_path(
        &user,
        &auth,
        factory.as_ref(),
        &source,
        &destination,
        "Failed to move file",
    )
    .await?;
    info!(username = user.username, source, destination, "move entry");
    Ok(JsonResponse(MessageResponse {
        message: "File moved successfully",
    }))
}

/// 重命名：新路径为原路径的同级目录加新名称。
pub async fn rename_entry(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<JsonResponse<RenameResponse>, ApiError> {
    let Ok(Json(RenameRequest { path, new_name })) = payload else {
        return Err(ApiError::BadRequest("Invalid request".into()));
    };
    if path.is_empty() || new_name.is_empty() {
        return Err(ApiError::BadRequest("Invalid request".into()));
    }
    let path = remote_path::normalize(&path)?;
    if path == "/" {
        return Err(ApiError::BadRequest("cannot rename the root directory".into()));
    }
    let new_path = remote_path::join(
        remote_path::parent(&path),
        remote_path::validate_name(&new_name)?,
    );

    rename_path(
        &user,
        &auth,
        factory.as_ref(),
        &path,
        &new_path,
        "Failed to rename file",
    )
    .await?;
    info!(username = user.username, path, new_path, "rename entry");
    Ok(JsonResponse(RenameResponse {
        message: "File renamed successfully",
        new_path,
    }))
}

/// 创建目录（含父级）。
pub async fn create_directory(
    user: AuthenticatedUser,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(factory): Extension<Arc<dyn SessionFactory>>,
    Path(raw): Path<String>,
) -> Result<JsonResponse<MessageResponse>, ApiError> {
    let path = remote_path::normalize(&raw)?;
    let session = open_session(&auth, factory.as_ref(), &user).await?;
    let result = create_dir_all(&*session, &path)
        .await
        .map_err(|err| ApiError::operation("Failed to create directory", err));
    session.release().await;
    result?;
    info!(username = user.username, path, "create directory");
    Ok(JsonResponse(MessageResponse {
        message: "Directory created successfully",
    }))
}
