//! 远端会话抽象与作用域获取。
//!
//! 每个 HTTP 请求由 [`SessionFactory`] 打开一个已认证的 [`RemoteSession`]，
//! 调用方通过 [`SessionGuard`] 持有；显式释放时关闭会话，否则在析构时关闭。

use async_trait::async_trait;
use std::io;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use crate::remote_path;
use crate::vault::Secret;

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{0}")]
    Transport(String),
    #[error("authentication rejected by remote server")]
    AuthRejected,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0}")]
    Status(String),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub metadata: RemoteMetadata,
}

/// 已打开的远端会话上可用的文件系统操作。
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 目录项，不含 `.` 与 `..`。
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;
    async fn stat(&self, path: &str) -> Result<RemoteMetadata, RemoteError>;
    /// 同 `stat`，但不跟随末端符号链接。
    async fn lstat(&self, path: &str) -> Result<RemoteMetadata, RemoteError>;
    async fn open_read(&self, path: &str) -> Result<RemoteReader, RemoteError>;
    /// 创建或截断文件用于写入。
    async fn create(&self, path: &str) -> Result<RemoteWriter, RemoteError>;
    async fn remove_file(&self, path: &str) -> Result<(), RemoteError>;
    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError>;
    async fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError>;
    async fn create_dir(&self, path: &str) -> Result<(), RemoteError>;
    /// 结束会话；允许重复调用。
    async fn close(&self) -> Result<(), RemoteError>;
}

/// 针对固定端点打开已认证的远端会话。
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        username: &str,
        secret: &Secret,
    ) -> Result<Arc<dyn RemoteSession>, ConnectError>;

    /// 打开后立即关闭会话，仅用于校验凭据。
    async fn test_only(&self, username: &str, secret: &Secret) -> Result<(), ConnectError> {
        let session = self.open(username, secret).await?;
        if let Err(err) = session.close().await {
            debug!(error = %err, "close after credential check failed");
        }
        Ok(())
    }
}

/// 在单个请求期间持有远端会话。
pub struct SessionGuard {
    session: Arc<dyn RemoteSession>,
    released: bool,
}

impl SessionGuard {
    pub async fn acquire(
        factory: &dyn SessionFactory,
        username: &str,
        secret: &Secret,
    ) -> Result<Self, ConnectError> {
        let session = factory.open(username, secret).await?;
        debug!(username, "remote session opened");
        Ok(Self {
            session,
            released: false,
        })
    }

    /// 关闭会话并等待关闭完成。
    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.session.close().await {
            warn!(error = %err, "remote session close failed");
        }
    }
}

impl Deref for SessionGuard {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = session.close().await {
                        warn!(error = %err, "remote session close failed");
                    }
                });
            }
            Err(_) => warn!("remote session dropped outside of a runtime"),
        }
    }
}

/// 远端文件读取器，在析构前保持所属会话打开。
pub struct SessionReader {
    reader: RemoteReader,
    _guard: SessionGuard,
}

impl SessionReader {
    pub fn new(reader: RemoteReader, guard: SessionGuard) -> Self {
        Self {
            reader,
            _guard: guard,
        }
    }
}

impl AsyncRead for SessionReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// 创建 `path` 及所有缺失的上级目录。
pub async fn create_dir_all(session: &dyn RemoteSession, path: &str) -> Result<(), RemoteError> {
    let mut current = String::from("/");
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current = remote_path::join(&current, segment);
        match session.stat(&current).await {
            Ok(metadata) if metadata.is_dir => continue,
            Ok(_) => {
                return Err(RemoteError::Status(format!(
                    "{current} exists and is not a directory"
                )));
            }
            Err(_) => session.create_dir(&current).await?,
        }
    }
    Ok(())
}

/// 深度优先删除目录树。
///
/// 遇到首个错误即停止，之前已删除的条目不会恢复。
pub fn remove_tree<'a>(
    session: &'a dyn RemoteSession,
    path: &'a str,
) -> Pin<Box<dyn std::future::Future<Output = Result<(), RemoteError>> + Send + 'a>> {
    Box::pin(async move {
        for entry in session.read_dir(path).await? {
            let child = remote_path::join(path, &entry.name);
            if entry.metadata.is_dir && !entry.metadata.is_symlink {
                remove_tree(session, &child).await?;
            } else {
                session.remove_file(&child).await?;
            }
        }
        session.remove_dir(path).await
    })
}
