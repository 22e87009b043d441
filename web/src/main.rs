//! Sessionguard HTTP server.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use sessionguard_auth::TracingSecurityEventSink;
use sessionguard_auth::providers::HttpIdentityProvider;
use sessionguard_auth::stores::{RedisKeyValueStore, RedisRateLimiter};
use sessionguard_web::{AppState, Config, ProductionState, TrustedProxies, build_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sessionguard_web=info,sessionguard_auth=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sessionguard");

    let config = Config::from_env();
    info!(
        redis_url = %config.redis.url,
        idp_token_url = %config.idp.token_url,
        landing_url = %config.auth.landing_url,
        trusted_proxy_hops = config.server.trusted_proxy_hops,
        "Configuration loaded"
    );
    if !config.idp.has_credentials() {
        warn!("IDP_CLIENT_ID / IDP_CLIENT_SECRET not set; every login will fail with missing_credentials");
    }
    let security = config.security_config();
    security
        .validate(config.idp.request_timeout)
        .context("Invalid security configuration")?;

    if !config.auth.cookie_secure {
        warn!("AUTH_COOKIE_SECURE=false; session cookies will be sent over plain HTTP");
    }

    if config.server.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.server.metrics_port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = config.server.metrics_port, "Prometheus metrics exporter listening");
    }

    let store = RedisKeyValueStore::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let limiter = RedisRateLimiter::from_connection(store.connection());
    let idp = HttpIdentityProvider::new(config.idp.clone())
        .context("Failed to build identity provider client")?;

    let state: ProductionState = AppState::new(
        Arc::new(store),
        Arc::new(idp),
        Arc::new(limiter),
        Arc::new(TracingSecurityEventSink::new()),
        &security,
        config.auth.cookie_secure,
    )
    .with_trusted_proxies(TrustedProxies(config.server.trusted_proxy_hops));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
