//! Router assembly and shared handler state

use crate::{handlers, middleware};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use zenodo_common::{DepositService, Publisher, Services};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub deposits: DepositService,
    pub publisher: Publisher,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            deposits: DepositService::new(services.clone()),
            publisher: Publisher::new(services.clone()),
            services,
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let config = &state.services.config.server;
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let body_limit = config.max_upload_bytes;

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let deposit_routes = Router::new()
        .route("/", post(handlers::deposit::create))
        .route(
            "/{id}",
            get(handlers::deposit::get)
                .put(handlers::deposit::update)
                .delete(handlers::deposit::delete),
        )
        .route(
            "/{id}/files",
            get(handlers::deposit::list_files)
                .post(handlers::deposit::add_file)
                .put(handlers::deposit::reorder_files),
        )
        .route(
            "/{id}/files/{key}",
            get(handlers::deposit::get_file)
                .put(handlers::deposit::rename_file)
                .delete(handlers::deposit::remove_file),
        )
        .route("/{id}/actions/{action}", post(handlers::deposit::action));

    let record_routes = Router::new()
        .route("/{recid}", get(handlers::records::get))
        .route("/{recid}/restricted", get(handlers::records::restricted))
        .route("/{recid}/files/{key}", get(handlers::records::download));

    let bucket_routes = Router::new()
        .route("/{bucket_id}", get(handlers::files::list))
        .route(
            "/{bucket_id}/{key}",
            get(handlers::files::download)
                .put(handlers::files::upload)
                .delete(handlers::files::delete),
        );

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/deposit", deposit_routes)
        .nest("/record", record_routes)
        .nest("/files", bucket_routes)
        .route("/oai2d", get(handlers::oai::get).post(handlers::oai::post))
        .route("/inbox", post(handlers::inbox::receive))
        // sitemap.xml and sitemap<n>.xml
        .route("/{file}", get(handlers::sitemap::serve))
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
