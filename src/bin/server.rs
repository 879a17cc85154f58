use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solar_proxy::api::{AppState, build_app, cors_layer};
use solar_proxy::{
    Collector, RecordStore, RenewalScheduler, Settings, SqliteRecordStore, TokenManager, Upstream,
    UpstreamClient,
};

/// Upper bound on how long a background task may take to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,solar_proxy=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    if settings.credentials.is_none() {
        tracing::warn!(
            "Missing credentials (API_ACCESS_KEY, API_APPKEY, USER_ACCOUNT, USER_PASSWORD); \
             gateway calls will fail until they are provided"
        );
    }

    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::connect(&settings.database_url)
            .await
            .with_context(|| format!("Failed to open database {}", settings.database_url))?,
    );
    let upstream: Arc<dyn Upstream> = Arc::new(
        UpstreamClient::new(settings.gateway.clone()).context("Failed to build HTTP client")?,
    );
    let tokens = TokenManager::new(upstream.clone(), settings.credentials.clone());

    tracing::info!("Obtaining initial token...");
    match tokens.renew().await {
        Ok(_) => tracing::info!("Initial token obtained successfully"),
        Err(e) => tracing::warn!("Failed to obtain initial token, API calls will fail until renewal succeeds: {}", e),
    }

    let collector = Arc::new(Collector::new(
        tokens.clone(),
        upstream,
        store,
        settings.fetch_interval,
    ));
    let scheduler = RenewalScheduler::new(tokens.clone(), settings.token_renewal_interval);

    let cancel = CancellationToken::new();
    let collector_task = tokio::spawn({
        let collector = collector.clone();
        let cancel = cancel.clone();
        async move { collector.run(cancel).await }
    });
    let renewal_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    let app = build_app(
        AppState::new(collector, tokens),
        cors_layer(&settings.cors_origins),
    );

    // Run server with graceful shutdown
    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.host, settings.port))?;
    tracing::info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    join_with_grace("collector", collector_task).await;
    join_with_grace("token renewal", renewal_task).await;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn join_with_grace(name: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
        Ok(Ok(())) => tracing::info!("{} task stopped", name),
        Ok(Err(e)) => tracing::error!("{} task failed: {}", name, e),
        Err(_) => {
            tracing::warn!("{} task did not stop within {:?}, aborting", name, SHUTDOWN_GRACE);
            task.abort();
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}
