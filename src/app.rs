use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, fields, groups, health, projects, sharing};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects))
        .route("/", post(projects::create_project))
        .route("/:id", get(projects::get_project))
        .route("/:id", put(projects::update_project))
        .route("/:id", delete(projects::delete_project))
        .route("/:id/fields", get(projects::get_field_values))
        .route("/:id/fields", put(projects::put_field_values))
        // sharing surface: every handler goes through the permission engine
        .route("/:id/users", get(sharing::get_project_users))
        .route("/:id/my-role", get(sharing::get_my_role))
        .route("/:id/groups", get(sharing::get_project_groups))
        .route("/:id/permissions", post(sharing::grant_permission))
        .route("/:id/permissions/:user_id", put(sharing::update_permission))
        .route("/:id/permissions/:user_id", delete(sharing::revoke_permission))
        .route("/:id/group-permissions", post(sharing::grant_group_permission))
        .route("/:id/group-permissions/:group_id", put(sharing::update_group_permission))
        .route("/:id/group-permissions/:group_id", delete(sharing::revoke_group_permission))
        .route("/:id/visibility", put(sharing::change_visibility));

    let group_routes = Router::new()
        .route("/", post(groups::create_group))
        .route("/:id", get(groups::get_group))
        .route("/:id", put(groups::update_group))
        .route("/:id", delete(groups::delete_group))
        .route("/:id/members", post(groups::add_member))
        .route("/:id/members/:user_id", delete(groups::remove_member));

    let field_routes = Router::new()
        .route("/", get(fields::list_fields))
        .route("/", post(fields::create_field))
        .route("/validate", post(fields::validate_field_values))
        .route("/:id", get(fields::get_field))
        .route("/:id", put(fields::update_field))
        .route("/:id", delete(fields::delete_field));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/projects", project_routes)
        .nest("/groups", group_routes)
        .nest("/fields", field_routes)
        .route("/my-groups", get(groups::list_my_groups))
        .route("/api/health", get(health::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
