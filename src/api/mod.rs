//! HTTP surface of the transporter portal

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::SecureRailsConfig;
use crate::database::DatabaseManager;
use crate::location::{AddressResolver, NominatimGeocoder, ReverseGeocoder};
use crate::session::SessionManager;
use crate::shutdown::shutdown_signal;
use crate::store::{SqliteStore, TransportStore};
use crate::telemetry::{create_request_span, generate_correlation_id};
use crate::transport::WorkflowEngine;
use crate::verification::{QrDecoder, RqrrDecoder};

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SecureRailsConfig>,
    pub engine: Arc<WorkflowEngine>,
    pub sessions: Arc<SessionManager>,
    pub resolver: AddressResolver,
    pub qr_decoder: Arc<dyn QrDecoder>,
}

impl AppState {
    pub fn new(
        config: SecureRailsConfig,
        store: Arc<dyn TransportStore>,
        geocoder: Arc<dyn ReverseGeocoder>,
        qr_decoder: Arc<dyn QrDecoder>,
    ) -> Self {
        let resolver = AddressResolver::new(geocoder, config.location.geocode_timeout());

        let mut engine = WorkflowEngine::new(store.clone(), config.workflow.checkpoint_order);
        if config.location.resolve_missing_addresses {
            engine = engine.with_resolver(resolver.clone());
        }

        let sessions = SessionManager::new(
            store,
            config.server.session_ttl_hours,
            config.server.login_attempts_per_minute,
        );

        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            sessions: Arc::new(sessions),
            resolver,
            qr_decoder,
        }
    }
}

/// Successful response body: `{"success": true, ...payload}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub payload: T,
}

pub fn ok<T: Serialize>(payload: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        payload,
    })
}

pub fn create_router(state: AppState) -> Router {
    let transport_api = Router::new()
        .route("/link-batch", post(handlers::link_batch))
        .route("/dispatch", post(handlers::dispatch))
        .route("/checkpoint", post(handlers::record_checkpoint))
        .route("/delivery", post(handlers::deliver))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/batches", get(handlers::my_batches))
        .route("/verify-qr", post(handlers::verify_qr))
        .route("/resolve-address", post(handlers::resolve_address));

    // Multipart framing needs some room above the image itself
    let body_limit = state.config.qr.max_image_bytes + 64 * 1024;

    let router = Router::new()
        .route("/health", get(handlers::health))
        .nest("/transport/api", transport_api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            create_request_span(
                request.method().as_str(),
                request.uri().path(),
                &generate_correlation_id(),
            )
        }));

    let router = match cors_layer(&state.config.server.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .allow_credentials(true),
    )
}

/// Run the HTTP server until SIGINT/SIGTERM
pub async fn serve(config: SecureRailsConfig) -> Result<()> {
    let database = DatabaseManager::from_config(&config.database).await?;
    let store: Arc<dyn TransportStore> = Arc::new(SqliteStore::new(database.pool().clone()));
    let geocoder: Arc<dyn ReverseGeocoder> = Arc::new(NominatimGeocoder::new(&config.location)?);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, store, geocoder, Arc::new(RqrrDecoder));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "SecureRails listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    database.shutdown().await;
    info!("Server stopped");
    Ok(())
}
