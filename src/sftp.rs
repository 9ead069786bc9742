//! 基于 SSH/SFTP 的远端会话（russh + russh-sftp）。
//!
//! 远端服务器需启用 sftp 子系统，例如 sshd_config 中的
//! `Subsystem sftp internal-sftp`。

use async_trait::async_trait;
use russh::Disconnect;
use russh::client::{self, Handle, Handler};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::remote::{
    ConnectError, RemoteEntry, RemoteError, RemoteMetadata, RemoteReader, RemoteSession,
    RemoteWriter, SessionFactory,
};
use crate::vault::Secret;

/// 握手时服务器主机密钥的校验方式。
#[derive(Debug, Clone)]
pub enum HostKeyCheck {
    AcceptAny,
    KnownHostsFile(PathBuf),
}

/// 所有会话连接的远端端点。
#[derive(Debug, Clone)]
pub struct SftpEndpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub host_key_check: HostKeyCheck,
}

#[derive(Debug, Clone)]
pub struct SftpConnector {
    endpoint: SftpEndpoint,
}

impl SftpConnector {
    pub fn new(endpoint: SftpEndpoint) -> Self {
        if matches!(endpoint.host_key_check, HostKeyCheck::AcceptAny) {
            warn!(
                host = endpoint.host,
                "SFTP host key verification disabled; set SFTP_KNOWN_HOSTS to enable it"
            );
        }
        Self { endpoint }
    }

    async fn connect(
        &self,
        username: &str,
        secret: &Secret,
    ) -> Result<SftpRemote, ConnectError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        });
        let handler = GatewayHandler {
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            host_key_check: self.endpoint.host_key_check.clone(),
        };

        debug!(host = self.endpoint.host, port = self.endpoint.port, "connecting");
        let mut handle = client::connect(
            config,
            (self.endpoint.host.as_str(), self.endpoint.port),
            handler,
        )
        .await
        .map_err(|err| ConnectError::Transport(format!("failed to connect to SSH server: {err}")))?;

        let auth = handle
            .authenticate_password(username, secret.expose())
            .await
            .map_err(|err| ConnectError::Transport(err.to_string()))?;
        if !auth.success() {
            return Err(ConnectError::AuthRejected);
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|err| ConnectError::Transport(format!("failed to open SSH channel: {err}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| {
                ConnectError::Transport(format!("failed to request SFTP subsystem: {err}"))
            })?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| ConnectError::Transport(format!("failed to create SFTP client: {err}")))?;

        Ok(SftpRemote { handle, sftp })
    }
}

#[async_trait]
impl SessionFactory for SftpConnector {
    async fn open(
        &self,
        username: &str,
        secret: &Secret,
    ) -> Result<Arc<dyn RemoteSession>, ConnectError> {
        let remote = tokio::time::timeout(
            self.endpoint.connect_timeout,
            self.connect(username, secret),
        )
        .await
        .map_err(|_| ConnectError::Transport("timed out connecting to SSH server".into()))??;
        Ok(Arc::new(remote))
    }
}

struct GatewayHandler {
    host: String,
    port: u16,
    host_key_check: HostKeyCheck,
}

impl Handler for GatewayHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.host_key_check {
            HostKeyCheck::AcceptAny => Ok(true),
            HostKeyCheck::KnownHostsFile(path) => {
                let known = russh::keys::check_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    path,
                )
                .unwrap_or(false);
                if !known {
                    warn!(host = self.host, "SFTP host key not found in known_hosts");
                }
                Ok(known)
            }
        }
    }
}

struct SftpRemote {
    handle: Handle<GatewayHandler>,
    sftp: SftpSession,
}

fn to_metadata(attrs: &FileAttributes) -> RemoteMetadata {
    let file_type = attrs.file_type();
    RemoteMetadata {
        size: attrs.size.unwrap_or(0),
        is_dir: file_type.is_dir(),
        is_symlink: file_type.is_symlink(),
        modified: attrs.modified().ok(),
    }
}

impl From<russh_sftp::client::error::Error> for RemoteError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        RemoteError::Status(err.to_string())
    }
}

#[async_trait]
impl RemoteSession for SftpRemote {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let entries = self.sftp.read_dir(path).await?;
        Ok(entries
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| RemoteEntry {
                name: entry.file_name(),
                metadata: to_metadata(&entry.metadata()),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<RemoteMetadata, RemoteError> {
        let attrs = self.sftp.metadata(path).await?;
        Ok(to_metadata(&attrs))
    }

    async fn lstat(&self, path: &str) -> Result<RemoteMetadata, RemoteError> {
        let attrs = self.sftp.symlink_metadata(path).await?;
        Ok(to_metadata(&attrs))
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, RemoteError> {
        let file = self.sftp.open(path).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, RemoteError> {
        let file = self.sftp.create(path).await?;
        Ok(Box::new(file))
    }

    async fn remove_file(&self, path: &str) -> Result<(), RemoteError> {
        Ok(self.sftp.remove_file(path).await?)
    }

    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError> {
        Ok(self.sftp.remove_dir(path).await?)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        Ok(self.sftp.rename(from, to).await?)
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        Ok(self.sftp.create_dir(path).await?)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if let Err(err) = self.sftp.close().await {
            debug!(error = %err, "sftp channel close failed");
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|err| RemoteError::Status(err.to_string()))
    }
}
