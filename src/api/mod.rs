mod handlers;
pub mod middleware;

use axum::{
    http::{HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::db::Database;
use crate::reconcile::Reconciler;

pub use middleware::SecurityConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub reconciler: Reconciler,
    pub config: Config,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            reconciler: crate::reconciler_for(&db),
            db,
            config,
        }
    }
}

pub fn create_router(db: Database, config: Config) -> Router {
    router(AppState::new(db, config))
}

/// Build the API around an existing state, e.g. one sharing a reconciler.
pub fn router(state: AppState) -> Router {
    let security = SecurityConfig::from_config(&state.config);

    let api = Router::new()
        .route("/projects", get(handlers::list_projects))
        .route(
            "/projects/{id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/{id}/plan", post(handlers::plan_project))
        .route("/projects/{id}/reconcile", post(handlers::reconcile_project))
        .route("/projects/{id}/rebuild", post(handlers::rebuild_project))
        .route("/projects/{id}/runs", get(handlers::list_runs))
        .route_layer(from_fn_with_state(
            security.clone(),
            middleware::auth_middleware,
        ))
        // Health stays reachable without a token.
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&security)),
        )
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    match &security.cors_origins {
        None => CorsLayer::permissive(),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(Any)
        }
    }
}
