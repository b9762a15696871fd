use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracker_mcp::api::{create_router, OAuthAppState};
use tracker_mcp::config::load_config;
use tracker_mcp::oauth::AuthorizationCoordinator;
use tracker_mcp::service_account::ServiceAccountRefresher;
use tracker_mcp::store::build_store;
use tracker_mcp::tracker::BackendAuth;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_mcp=info".into()),
        )
        .init();

    info!("Tracker MCP starting...");

    let config_path = std::env::var("TRACKER_CONFIG").ok().map(PathBuf::from);
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

    let shutdown = CancellationToken::new();

    // Service-account credential refresh runs for the whole process lifetime
    let (refresher, refresh_handle) = match &config.service_account {
        Some(sa_config) => {
            let refresher = Arc::new(
                ServiceAccountRefresher::from_config(sa_config)
                    .context("Failed to initialize service account refresher")?,
            );
            let handle = refresher.spawn_refresh_loop(shutdown.clone());
            info!(service_account_id = %sa_config.service_account_id, "Service account refresh started");
            (Some(refresher), Some(handle))
        }
        None => (None, None),
    };

    // Outbound tracker calls take their headers from this handle
    let backend_auth = Arc::new(
        BackendAuth::new(&config.tracker, refresher)
            .context("Invalid tracker authentication settings")?,
    );
    match backend_auth.default_method() {
        // Resolving once mints the service-account credential before the first call
        Some(method) => match backend_auth.headers(None).await {
            Ok(_) => info!(method = ?method, "Tracker authentication configured"),
            Err(e) => warn!(
                method = ?method,
                error = %e,
                "Tracker credentials could not be resolved at startup"
            ),
        },
        None if config.oauth.enabled => info!("Tracker calls will use per-request OAuth tokens"),
        None => warn!("No tracker credentials configured"),
    }

    let oauth_state = if config.oauth.enabled {
        let store = build_store(&config.store)
            .await
            .context("Failed to initialize OAuth store")?;
        let coordinator = AuthorizationCoordinator::from_config(
            &config.oauth,
            &config.server.public_url(),
            store,
        )
        .context("Failed to initialize OAuth coordinator")?;
        info!(
            backend = ?config.store.backend,
            callback_url = %coordinator.callback_url(),
            "OAuth authorization server enabled"
        );
        Some(OAuthAppState {
            coordinator: Arc::new(coordinator),
        })
    } else {
        None
    };

    let router = create_router(oauth_state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(address = %addr, "HTTP server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await
        .context("HTTP server error")?;

    // Graceful shutdown
    shutdown.cancel();
    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Service account refresh task ended abnormally");
        }
    }
    info!("Tracker MCP stopped");

    Ok(())
}
