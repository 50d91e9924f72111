use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware, Router,
};
use snapvault_core::{CoreConfig, ServerConfig};
use snapvault_storage::create_backend;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use crate::{
    middleware::{
        handle_panic, request_id_middleware, request_size_limit_middleware, request_span,
    },
    routes::{create_router, AppState},
    ServerError, ServerResult,
};

/// Main server struct that owns the router and the bind address
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Build the storage backend and router from configuration
    pub async fn new(config: CoreConfig) -> ServerResult<Self> {
        info!("Initializing snapvault server...");

        let storage = create_backend(&config.storage, &config.upload)
            .await
            .map_err(|e| ServerError::Internal(format!("Storage initialization failed: {}", e)))?;

        info!("Using {} storage backend", storage.kind());

        let state = AppState::new(
            storage,
            config.upload.clone(),
            config.gallery.clone(),
            config.server.enable_delete,
        );

        let router = create_app_router(state, &config.server);

        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| ServerError::Internal(format!("Invalid server address: {}", e)))?;

        Ok(Self { router, addr })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Start the server and listen for incoming connections
    pub async fn serve(self) -> ServerResult<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind to address: {}", e)))?;

        info!("Server running at http://{}", self.addr);
        info!("View photos at http://{}/gallery", self.addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Wrap the routes in the full middleware stack
pub fn create_app_router(state: AppState, config: &ServerConfig) -> Router {
    let cors_layer = if config.cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(
            config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        )
    };
    let cors_layer = cors_layer
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::USER_AGENT])
        .max_age(Duration::from_secs(3600));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(request_span)
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware_stack = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn_with_state(
            config.max_request_size,
            request_size_limit_middleware,
        ))
        .layer(trace_layer)
        .layer(cors_layer)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)));

    // Chunked bodies carry no Content-Length, the body limit catches those.
    create_router(state)
        .layer(DefaultBodyLimit::max(config.max_request_size))
        .layer(middleware_stack)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
