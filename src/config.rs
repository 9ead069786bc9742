//! CLI arguments and gateway configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_SFTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_SFTP_PORT: u16 = 22;
pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:8080,http://localhost:5173";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 32 * 1024 * 1024 * 1024;
pub const VAULT_PRUNE_INTERVAL_SECS: u64 = 60;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "sftp-gateway", version = VERSION_INFO, about = "HTTP gateway for an SFTP server")]
pub struct Args {
    #[arg(
        long,
        env = "SFTP_HOST",
        help = "SFTP server host (falls back to SFTP_URL)"
    )]
    pub sftp_host: Option<String>,
    #[arg(
        long,
        env = "SFTP_PORT",
        default_value_t = DEFAULT_SFTP_PORT,
        help = "SFTP server port"
    )]
    pub sftp_port: u16,
    #[arg(
        long,
        env = "SFTP_KNOWN_HOSTS",
        help = "known_hosts file used to verify the SFTP host key"
    )]
    pub known_hosts: Option<String>,
    #[arg(
        long,
        env = "SFTP_CONNECT_TIMEOUT_SECS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        help = "SSH connect and authentication timeout in seconds"
    )]
    pub connect_timeout_secs: u64,
    #[arg(
        long,
        env = "JWT_SECRET",
        hide_env_values = true,
        help = "Token signing secret (random per process when unset)"
    )]
    pub jwt_secret: Option<String>,
    #[arg(
        long,
        env = "TOKEN_TTL_SECS",
        default_value_t = DEFAULT_TOKEN_TTL_SECS,
        help = "Token lifetime in seconds"
    )]
    pub token_ttl_secs: u64,
    #[arg(
        short = 'b',
        long = "bind",
        env = "GATEWAY_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "SERVER_PORT",
        default_value_t = DEFAULT_SERVER_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'P',
        long,
        env = "GATEWAY_HTTPS_PORT",
        default_value_t = 8443,
        help = "HTTPS port (only used with --tls-cert and --tls-key)"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "GATEWAY_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "GATEWAY_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "GATEWAY_CORS_ORIGINS",
        default_value = DEFAULT_CORS_ORIGINS,
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: String,
    #[arg(
        long,
        env = "UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
}

impl Args {
    /// Remote host, honouring the legacy `SFTP_URL` variable.
    pub fn resolved_sftp_host(&self) -> String {
        self.sftp_host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .or_else(|| {
                std::env::var("SFTP_URL")
                    .ok()
                    .filter(|host| !host.trim().is_empty())
            })
            .unwrap_or_else(|| DEFAULT_SFTP_HOST.to_string())
    }
}
