use std::{sync::Arc, time::Duration};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cache;
mod codegen;
mod config;
mod error;
mod handlers;
mod lifecycle;
mod models;
mod probe;
mod resolver;
mod singleflight;
mod store;
#[cfg(test)]
mod testing;
mod writer;

use cache::{LinkCache, MemoryCache, RedisCache};
use config::CacheBackend;
use lifecycle::Lifecycle;
use probe::HttpProbe;
use resolver::LinkResolver;
use store::{LinkStore, SqliteStore};
use writer::LinkWriter;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: config::AppConfig,
    /// Direct store access for owner lookups, which bypass the cache.
    pub store: Arc<dyn LinkStore>,
    pub writer: LinkWriter,
    pub resolver: LinkResolver,
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent, env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shortlink=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting shortlink on {}:{}", config.host, config.port);
    tracing::info!(
        "Code length {}, cache TTL {}s, cache backend {}",
        config.core.code_len,
        config.core.code_ttl_secs,
        match config.cache {
            CacheBackend::Memory => "memory",
            CacheBackend::Redis { .. } => "redis",
        }
    );

    // Built before any resource is started.
    let probe = Arc::new(HttpProbe::new(config.core.long_url_timeout)?);

    // ── Resources ──────────────────────────────────────────────────────────
    let mut lifecycle = Lifecycle::new();

    let sqlite = Arc::new(SqliteStore::connect_lazy(&config.database_url)?);
    lifecycle.register(sqlite.clone());

    let cache: Arc<dyn LinkCache> = match &config.cache {
        CacheBackend::Memory => {
            let memory = Arc::new(MemoryCache::new());
            memory.spawn_sweeper(Duration::from_secs(60));
            lifecycle.register(memory.clone());
            memory
        }
        CacheBackend::Redis {
            url,
            key_prefix,
            connect_timeout,
        } => {
            let redis = Arc::new(RedisCache::new(url, key_prefix.clone(), *connect_timeout)?);
            lifecycle.register(redis.clone());
            redis
        }
    };

    lifecycle.startup().await?;
    sqlite.spawn_retention_sweep(config.retention_sweep_interval);

    // ── Core services ──────────────────────────────────────────────────────
    let store: Arc<dyn LinkStore> = sqlite;
    let writer = LinkWriter::new(store.clone(), probe, &config.core);
    let resolver = LinkResolver::new(cache, store.clone(), &config.core);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        store,
        writer,
        resolver,
    });

    // ── Serve ──────────────────────────────────────────────────────────────
    let app = handlers::router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            lifecycle.shutdown().await;
            return Err(e.into());
        }
    };
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("Shutting down");
    lifecycle.shutdown().await;

    served?;
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {:?}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {:?}", e);
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
}
