//! Entry point for the apidocs-server binary.

use std::sync::Arc;

use apidocs_core::{EtcdWatchClient, MemoryKv, Registry, WatchClient, WatchSubscriber};
use apidocs_server::{
    config::ServerConfig,
    middleware::request_id::{propagate_request_id, request_id_layer, trace_layer},
    routes,
    state::AppState,
};
use axum::middleware;
use http::HeaderValue;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    tracing::info!("Starting apidocs-server");
    tracing::info!(
        "Configuration: port={}, log_level={}, base_path={}, gated={}",
        config.port,
        config.log_level,
        config.base_path(),
        !config.tokens.is_empty()
    );

    // Registry and static sources
    let registry = Arc::new(Registry::new());
    let subscriber = WatchSubscriber::new(registry.clone(), config.namespace());
    let sources = config.load_doc_sources()?;
    subscriber.bootstrap(&sources, &config.advertised_host);
    tracing::info!(
        sources = sources.len(),
        namespace = %subscriber.namespace(),
        "Loaded static doc sources"
    );

    // Watch client
    let client: Arc<dyn WatchClient> = match &config.etcd_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Watching etcd");
            Arc::new(EtcdWatchClient::new(endpoint.clone()))
        }
        None => {
            tracing::info!("No ETCD_ENDPOINT set, using in-process store");
            Arc::new(MemoryKv::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut watcher = tokio::spawn(async move { subscriber.run(client.as_ref(), shutdown_rx).await });

    // Build application state
    let state = AppState::new(config.clone(), registry)?;

    // Build CORS layer
    let cors = build_cors_layer(&config.cors_allowed_origins)?;

    // Build router with middleware
    let app = routes::build_router(state)
        .layer(middleware::from_fn(propagate_request_id))
        .layer(trace_layer())
        .layer(request_id_layer())
        .layer(cors);

    // Create listener
    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    // Run server with graceful shutdown; a failed watcher is fatal
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => result?,
        outcome = &mut watcher => {
            let error: Box<dyn std::error::Error> = match outcome {
                Ok(Ok(())) => "watch subscriber stopped unexpectedly".into(),
                Ok(Err(e)) => Box::new(e),
                Err(e) => Box::new(e),
            };
            tracing::error!(error = %error, "Watch subscription terminated, shutting down");
            return Err(error);
        }
    }

    // Stop the watcher with the server
    let _ = shutdown_tx.send(true);
    match watcher.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Watch subscriber ended with error"),
        Err(e) => tracing::warn!(error = %e, "Watch subscriber task failed"),
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build CORS layer from configuration.
fn build_cors_layer(allowed_origins: &str) -> Result<CorsLayer, http::header::InvalidHeaderValue> {
    let origin = if allowed_origins == "*" {
        AllowOrigin::any()
    } else {
        // Parse comma-separated origins
        let origins = allowed_origins
            .split(',')
            .map(|s| s.trim().parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
