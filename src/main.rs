//! SFTP gateway server binary.
//!
//! Exposes a JSON/HTTP file API over a remote SSH/SFTP server. Logins are
//! checked against the remote server itself; every later request opens a
//! fresh SFTP session on behalf of the token holder.

mod auth;
mod background;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod remote;
mod remote_path;
mod routes;
mod sftp;
#[cfg(test)]
mod testing;
mod tls;
mod token;
mod vault;
mod version;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span, warn};

use crate::auth::AuthConfig;
use crate::background::spawn_background_tasks;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::remote::SessionFactory;
use crate::sftp::{HostKeyCheck, SftpConnector, SftpEndpoint};
use crate::token::TokenService;
use crate::vault::CredentialVault;

shadow!(build);

/// Starts the gateway and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let secret = match args.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            warn!("JWT_SECRET not set; tokens will not survive a restart");
            TokenService::random_secret()
        }
    };
    let auth_config = Arc::new(AuthConfig {
        tokens: TokenService::new(&secret, Duration::from_secs(args.token_ttl_secs)),
        vault: CredentialVault::new(),
    });

    let endpoint = SftpEndpoint {
        host: args.resolved_sftp_host(),
        port: args.sftp_port,
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        host_key_check: match &args.known_hosts {
            Some(path) => HostKeyCheck::KnownHostsFile(PathBuf::from(path)),
            None => HostKeyCheck::AcceptAny,
        },
    };
    info!(
        host = endpoint.host,
        port = endpoint.port,
        "forwarding file operations to SFTP server"
    );
    let factory: Arc<dyn SessionFactory> = Arc::new(SftpConnector::new(endpoint));

    let mut app = routes::build_router(auth_config.clone(), factory, args.upload_max_size).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let connect_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip());
                let client_ip = resolve_client_ip(request.headers(), connect_ip)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    if let Some(cors_layer) = build_cors_layer(&args.cors_origins) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.port);
    let tls_config = tls::build_rustls_config(&args).await?;
    let handle = Handle::new();

    spawn_background_tasks(auth_config);

    info!("Starting HTTP server at {}", http_addr);
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());

    match tls_config {
        Some(tls_config) => {
            let https_addr = SocketAddr::new(host, args.https_port);
            info!("Starting HTTPS server at {}", https_addr);
            let https_server = axum_server::bind_rustls(https_addr, tls_config)
                .handle(handle.clone())
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());
            tokio::select! {
                result = http_server => result?,
                result = https_server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
        None => {
            tokio::select! {
                result = http_server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
