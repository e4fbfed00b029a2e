//! # vatsctl: control plane for PBX instances
//!
//! `vatsctl` manages the lifecycle of PBX ("VATS") instances and the SIP extensions
//! provisioned under them, and exposes the call detail records those instances write.
//!
//! ## Overview
//!
//! Every instance listens on a pair of ports: a SIP port chosen by the operator and an
//! HTTP port derived from it (`sip_port + http_offset`, 1000 by default). No port may be
//! held by two live instances, in either role. Each instance owns a set of extensions
//! (SIP accounts) whose usernames are unique within that instance. Deleting an instance
//! removes its extensions with it and frees both ports for reuse.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). Handlers in [`api`] are
//! thin adapters over [`manager::LifecycleManager`], which owns the invariants: port
//! allocation happens under a registry-wide lock, per-instance locks serialize work on
//! one instance, and mutations run on spawned tasks so an abandoned request still
//! completes or leaves no trace.
//!
//! Storage sits behind the repository traits in [`db::handlers`]. The default backend is
//! in memory; building with the `postgres` feature adds sqlx repositories backed by the
//! schema in `migrations/`, where unique constraints repeat the port and name rules.
//!
//! ## Configuration
//!
//! See [`config`]. A YAML file (`-f config.yaml`) is merged with `VATSCTL_`-prefixed
//! environment variables; `DATABASE_URL` switches storage to Postgres.
//!
//! ## Quick start
//!
//! ```no_run
//! use vatsctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     vatsctl::telemetry::init_telemetry()?;
//!     let app = Application::new(Config::default()).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod manager;
mod openapi;
pub mod ports;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::config::{CorsOrigin, StorageConfig};
use crate::db::handlers::{CdrSource, ExtensionRepository, InMemoryCdr, InMemoryStore, InstanceRepository};
use crate::manager::LifecycleManager;
use crate::openapi::ApiDoc;
pub use config::Config;
pub use types::{ExtensionId, InstanceId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .manager(manager)
///     .cdr(cdr)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub manager: LifecycleManager,
    pub cdr: Arc<dyn CdrSource>,
}

/// The storage implementations an [`Application`] runs over.
pub struct Backends {
    instances: Arc<dyn InstanceRepository>,
    extensions: Arc<dyn ExtensionRepository>,
    cdr: Arc<dyn CdrSource>,
}

impl Backends {
    pub fn new(
        instances: Arc<dyn InstanceRepository>,
        extensions: Arc<dyn ExtensionRepository>,
        cdr: Arc<dyn CdrSource>,
    ) -> Self {
        Self {
            instances,
            extensions,
            cdr,
        }
    }

    /// Fresh, empty in-memory storage.
    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        Self::new(Arc::new(store.clone()), Arc::new(store), Arc::new(InMemoryCdr::new()))
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::db::handlers::{PgCdr, PgExtensions, PgInstances};

        Self::new(
            Arc::new(PgInstances::new(pool.clone())),
            Arc::new(PgExtensions::new(pool.clone())),
            Arc::new(PgCdr::new(pool)),
        )
    }
}

/// Get the vatsctl database migrator
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str, pool: &config::PoolSettings) -> anyhow::Result<sqlx::PgPool> {
    use anyhow::Context;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(pool.max_connections)
        .min_connections(pool.min_connections)
        .acquire_timeout(pool.acquire_timeout)
        .connect(url)
        .await
        .context("Failed to connect to Postgres")?;
    migrator().run(&pool).await.context("Failed to run database migrations")?;
    info!("Database migrations applied");
    Ok(pool)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.cors.allowed_origins;
    let origins = if allowed.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                // Url always serializes with a trailing slash; Origin headers never carry one
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(vec![http::header::LOCATION, http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: API routes, health check, API docs, CORS and tracing.
///
/// Collection routes are also served with a trailing slash, which is what the existing
/// dashboard requests.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{cdr, extensions, instances, integrity};

    let api_routes = Router::new()
        .route("/instances", get(instances::list_instances).post(instances::create_instance))
        .route("/instances/", get(instances::list_instances).post(instances::create_instance))
        .route(
            "/instances/{id}",
            get(instances::get_instance)
                .put(instances::update_instance)
                .patch(instances::update_instance)
                .delete(instances::delete_instance),
        )
        .route(
            "/instances/{id}/users",
            get(extensions::list_extensions).post(extensions::create_extension),
        )
        .route(
            "/instances/{id}/users/{extension_id}",
            axum::routing::delete(extensions::delete_extension),
        )
        .route("/cdr", get(cdr::query_cdr))
        .route("/cdr/", get(cdr::query_cdr))
        .route("/cdr/export", post(cdr::export_cdr))
        .route("/cdr//export", post(cdr::export_cdr))
        .route("/integrity", get(integrity::get_integrity))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// A configured server, ready to [`serve`](Application::serve).
pub struct Application {
    router: Router,
    config: Config,
    #[cfg(feature = "postgres")]
    pool: Option<sqlx::PgPool>,
}

impl Application {
    /// Set up storage as configured and build the router.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting vatsctl with configuration: {:#?}", config);

        match &config.storage {
            StorageConfig::Memory => {
                info!("Using in-memory storage; state is lost on shutdown");
                Self::with_backends(config, Backends::in_memory())
            }
            #[cfg(feature = "postgres")]
            StorageConfig::Postgres { url, pool } => {
                let pool = connect_postgres(url, pool).await?;
                let mut app = Self::with_backends(config, Backends::postgres(pool.clone()))?;
                app.pool = Some(pool);
                Ok(app)
            }
            #[cfg(not(feature = "postgres"))]
            StorageConfig::Postgres { .. } => {
                anyhow::bail!("Postgres storage is configured but vatsctl was built without the `postgres` feature")
            }
        }
    }

    /// Build the application over already constructed storage.
    pub fn with_backends(config: Config, backends: Backends) -> anyhow::Result<Self> {
        config.validate()?;

        let manager = LifecycleManager::new(
            backends.instances,
            backends.extensions,
            config.ports,
            config.seed.extensions.clone(),
        );
        let app_state = AppState::builder()
            .config(config.clone())
            .manager(manager)
            .cdr(backends.cdr)
            .build();
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            #[cfg(feature = "postgres")]
            pool: None,
        })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "vatsctl listening on http://{}, API docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        #[cfg(feature = "postgres")]
        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
