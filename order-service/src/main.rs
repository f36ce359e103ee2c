mod api;
mod cache;
mod config;
mod ingest;
mod models;
mod schema;
mod source;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::OrderCache;
use crate::config::Args;
use crate::ingest::OrderIngestor;
use crate::source::KafkaSource;
use crate::store::{OrderStore, PgOrderStore};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // Run migrations first
    info!("Running database migrations...");
    store::run_migrations(&args.database_url)?;
    info!("Migrations completed successfully");

    let pg = PgOrderStore::connect(&args.database_url, args.db_pool_size, args.store_timeout()).await?;
    let store: Arc<dyn OrderStore> = Arc::new(pg);
    let cache = Arc::new(OrderCache::new(args.cache_capacity, args.recency_policy()));

    match store::load_recent(store.as_ref(), cache.capacity() as i64).await {
        Ok(orders) => {
            cache.warm(orders);
            info!(
                "Cache preloaded: {}/{} (policy {:?})",
                cache.len(),
                cache.capacity(),
                cache.policy()
            );
        }
        Err(e) => warn!("Cache preload failed: {}", e),
    }

    let mut source = KafkaSource::new(&args.kafka_brokers, &args.group_id, &args.topic)?;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let ingestor = OrderIngestor::new(store.clone(), cache.clone()).with_backoff(args.retry_backoff());
    let pipeline = tokio::spawn({
        let cancel = cancel.clone();
        async move { ingestor.run(&mut source, cancel).await }
    });
    info!(
        "Consuming topic {} as group {} from {}",
        args.topic, args.group_id, args.kafka_brokers
    );

    let app = api::create_router(api::AppState { store, cache });
    let server = axum::serve(listener, app).with_graceful_shutdown(cancel.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });
    info!("Order service listening on http://0.0.0.0:{}", args.port);

    let stopped_early = tokio::select! {
        result = &mut server => Some(result),
        _ = cancel.cancelled() => None,
    };

    match stopped_early {
        Some(result) => {
            match result {
                Ok(Ok(())) => warn!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => error!("HTTP server failed: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
            cancel.cancel();
        }
        None => {
            info!("Shutting down...");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
                Ok(Ok(Err(e))) => error!("HTTP shutdown error: {}", e),
                Ok(Err(e)) => error!("HTTP server task failed: {}", e),
                Err(_) => {
                    warn!("HTTP server did not drain within {:?}", SHUTDOWN_GRACE);
                    server.abort();
                }
            }
        }
    }

    // The pipeline finishes any write already underway before it stops.
    match pipeline.await {
        Ok(_) => info!("Consumer stopped"),
        Err(e) => error!("Ingestion task failed: {}", e),
    }

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
