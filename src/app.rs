use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{bypass_role_from_env, DefaultPolicyEvaluator, PolicyEvaluator};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::notify::{Notifier, PersistentNotifier};
use crate::routes::{audit, auth, health, notifications, plan, rbac, reports};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub evaluator: Arc<dyn PolicyEvaluator>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtConfig,
        event_bus: EventBus,
        evaluator: Arc<dyn PolicyEvaluator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
            evaluator,
            notifier,
        }
    }
}

/// Builds the full application router and starts the activity listener.
///
/// The listener is spawned here rather than in `main` so integration tests
/// that build the app through this function get activity persistence too.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let evaluator: Arc<dyn PolicyEvaluator> =
        Arc::new(DefaultPolicyEvaluator::new(bypass_role_from_env()));
    let notifier: Arc<dyn Notifier> =
        Arc::new(PersistentNotifier::new(pool.clone(), event_bus.clone()));

    let state = AppState::new(pool, jwt_config, event_bus, evaluator, notifier);

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .nest("/auth", auth::routes())
        .nest("/rbac", rbac::routes())
        .merge(plan::routes())
        .nest("/reports", reports::routes())
        .nest("/notifications", notifications::routes())
        .merge(audit::routes())
        .merge(health::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
