use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use vod_aggregator::config::AppConfig;
use vod_aggregator::{build_http_client, http, AppState};

const CERT_DIR: &str = "/app/certificates";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = AppConfig::path_from_env();
    let config = AppConfig::load_or_default(Path::new(&config_path))?;

    info!("Starting VOD aggregator");
    info!(
        sources = config.sources.len(),
        api_version = %config.server.api_version,
        "Providers configured"
    );

    let http_client = build_http_client(Duration::from_secs(config.upstream.timeout_secs))?;
    let sweep_interval = config.cache.sweep_interval();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = Arc::new(AppState::new(config, http_client)?);
    let _sweeper = state.service.cache().spawn_sweeper(sweep_interval);

    let app = http::router(Arc::clone(&state));

    // Start server
    let tls_cert = env::var("TLS_HOST_CERT").ok();
    let tls_key = env::var("TLS_HOST_KEY").ok();

    match (tls_cert, tls_key) {
        (Some(cert_name), Some(key_name)) => {
            let cert_path = Path::new(CERT_DIR).join(cert_name);
            let key_path = Path::new(CERT_DIR).join(key_name);
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
            info!("VOD aggregator listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        (None, None) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("VOD aggregator listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
        _ => {
            warn!("TLS_HOST_CERT and TLS_HOST_KEY must both be set to enable inbound TLS. Falling back to HTTP.");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("VOD aggregator listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
