//! TLS 证书加载（仅在同时提供证书与私钥时启用 HTTPS）。

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Args;

/// 构建 Rustls 配置；未配置证书时返回 `None`。
pub async fn build_rustls_config(args: &Args) -> Result<Option<RustlsConfig>, io::Error> {
    let (cert_path, key_path) = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => return Ok(None),
        _ => {
            warn!("both --tls-cert and --tls-key are required for HTTPS; serving HTTP only");
            return Ok(None);
        }
    };

    let cert = fs::read(cert_path).await?;
    let key = fs::read(key_path).await?;
    info!(cert = cert_path, "loaded TLS certificate");
    RustlsConfig::from_pem(cert, key).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test]
    async fn https_is_off_without_both_files() {
        let args = Args::try_parse_from(["sftp-gateway"]).unwrap();
        assert!(build_rustls_config(&args).await.unwrap().is_none());

        let args =
            Args::try_parse_from(["sftp-gateway", "--tls-cert", "/nonexistent.pem"]).unwrap();
        assert!(build_rustls_config(&args).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_certificate_file_is_an_error() {
        let args = Args::try_parse_from([
            "sftp-gateway",
            "--tls-cert",
            "/nonexistent/cert.pem",
            "--tls-key",
            "/nonexistent/key.pem",
        ])
        .unwrap();
        assert!(build_rustls_config(&args).await.is_err());
    }
}
