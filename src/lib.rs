pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::cache::CapacityCache;
use crate::config::{Config, StoreBackend};
use crate::database::Database;
use crate::redis_client::RedisClient;
use crate::services::coordinator::{ReservationCoordinator, RetryPolicy};
use crate::store::{InMemoryStore, PgReservationStore, ReservationStore};

// Shared state for the whole application
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ReservationStore>,
    pub coordinator: ReservationCoordinator,
    pub cache: CapacityCache,
    pub db: Option<Database>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let lock_timeout = config.reservation.lock_timeout();

        let (store, db): (Arc<dyn ReservationStore>, Option<Database>) = match config.store.backend {
            StoreBackend::Postgres => {
                let url = config
                    .database
                    .url
                    .as_deref()
                    .context("DATABASE_URL must be set for the postgres backend")?;
                let db = Database::new(url, &config.database)
                    .await
                    .context("failed to connect to database")?;
                info!("Database connected");
                db.run_migrations()
                    .await
                    .context("failed to run migrations")?;
                let store = PgReservationStore::new(db.pool.clone(), lock_timeout);
                (Arc::new(store), Some(db))
            }
            StoreBackend::Memory => {
                warn!("Using in-memory store, bookings will not survive a restart");
                (Arc::new(InMemoryStore::new(lock_timeout)), None)
            }
        };

        // The cache is optional: without Redis availability reads hit the store.
        let redis = match config.redis.url.as_deref() {
            Some(url) => match RedisClient::new(url).await {
                Ok(client) => {
                    info!("Redis connected, availability cache enabled");
                    Some(client)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, availability cache disabled");
                    None
                }
            },
            None => None,
        };

        let cache = CapacityCache::new(redis, store.clone(), config.redis.capacity_ttl_seconds);
        Ok(Arc::new(Self::assemble(config, store, cache, db)))
    }

    /// State over an existing store, without Postgres or Redis.
    pub fn with_store(config: Config, store: Arc<dyn ReservationStore>) -> Arc<Self> {
        let cache = CapacityCache::new(None, store.clone(), config.redis.capacity_ttl_seconds);
        Arc::new(Self::assemble(config, store, cache, None))
    }

    fn assemble(
        config: Config,
        store: Arc<dyn ReservationStore>,
        cache: CapacityCache,
        db: Option<Database>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.reservation);
        let coordinator = ReservationCoordinator::new(store.clone(), retry);
        Self {
            config,
            store,
            coordinator,
            cache,
            db,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(db) = &self.db {
            db.close().await;
        }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.app.request_timeout_seconds);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
