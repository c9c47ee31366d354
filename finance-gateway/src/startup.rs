//! Application startup and lifecycle management.
//!
//! Every collaborator is built once here and handed to the router through
//! [`AppState`].

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers;
use crate::services::{
    FinanceApi, FinanceApiClient, GatewayAvailability, InMemoryOrderRepository, LifecycleEngine,
    MongoOrderRepository, OrderRepository, PlanCatalog,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: LifecycleEngine,
    pub availability: GatewayAvailability,
    pub catalog: PlanCatalog,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        api: Arc<dyn FinanceApi>,
        orders: Arc<dyn OrderRepository>,
    ) -> Self {
        let settings = Arc::new(config.gateway.clone());
        let catalog = PlanCatalog::new(
            api.clone(),
            settings.clone(),
            config.finance_api.plan_cache_ttl,
        );
        let availability = GatewayAvailability::new(
            api.clone(),
            catalog.clone(),
            settings,
            config.finance_api.has_api_key(),
            config.finance_api.resolved_base_url().ok(),
        );
        let engine = LifecycleEngine::new(config.clone(), api, orders);

        Self {
            config,
            engine,
            availability,
            catalog,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/webhooks/finance", post(handlers::webhook::finance_webhook))
        .route("/plans", get(handlers::plans::list_plans))
        .route(
            "/checkout/applications",
            post(handlers::checkout::submit_application),
        )
        .route(
            "/checkout/availability",
            post(handlers::checkout::availability),
        )
        .route(
            "/admin/finance/status-check",
            get(handlers::admin::status_check),
        )
        .route(
            "/admin/finance/status-update",
            get(handlers::admin::status_update),
        )
        .route(
            "/admin/finance/status-skip",
            get(handlers::admin::status_skip),
        )
        .route(
            "/admin/finance/environment",
            get(handlers::admin::environment),
        )
        .route(
            "/orders/:order_id/completed",
            post(handlers::admin::order_completed),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    ///
    /// Orders live in MongoDB when a database is configured, otherwise in memory.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let orders: Arc<dyn OrderRepository> = match &config.database {
            Some(database) => {
                let mut client_options = ClientOptions::parse(database.url.expose_secret())
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to parse MongoDB connection string: {}", e);
                        AppError::DatabaseError(e.into())
                    })?;
                client_options.app_name = Some(config.service_name.clone());

                let client = Client::with_options(client_options)?;
                let repository = MongoOrderRepository::new(&client.database(&database.db_name));
                repository.init_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    AppError::DatabaseError(e)
                })?;
                Arc::new(repository)
            }
            None => {
                tracing::warn!("ORDER_DATABASE_URL not set; orders are kept in memory");
                Arc::new(InMemoryOrderRepository::new())
            }
        };

        Self::build_with_repository(config, orders).await
    }

    pub async fn build_with_repository(
        config: Config,
        orders: Arc<dyn OrderRepository>,
    ) -> Result<Self, AppError> {
        let client = FinanceApiClient::new(config.finance_api.clone())?;
        match client.base_url() {
            Some(base_url) => tracing::info!(base_url, "Finance API client initialized"),
            None => tracing::warn!(
                "Finance API key or URL not configured - finance will not be offered"
            ),
        }

        let addr = SocketAddr::new(
            config
                .common
                .host
                .parse()
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("invalid host: {}", e)))?,
            config.common.port,
        );

        let state = AppState::new(Arc::new(config), Arc::new(client), orders);
        let router = build_router(state);

        // Port 0 binds a random port for tests
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Finance gateway: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
