use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod authorization;
pub mod basic_auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod password;
pub mod registration;
pub mod repository;
pub mod resolver;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::{AuthUser, AuthenticatorState, JwtAuthenticator};
pub use authorization::RoleAuthorizer;
pub use cache::{CacheState, MokaUserCache, NoopUserCache};
pub use config::AppConfig;
pub use error::AppError;
pub use mailer::{MailerState, MockMailer, SendGridMailer};
pub use registration::RegistrationFlow;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use resolver::UserResolver;

/// ApiDoc
///
/// OpenAPI document for every route decorated with `#[utoipa::path]`.
/// Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check, handlers::register_user, handlers::create_token,
        handlers::activate_user, handlers::get_me, handlers::get_user,
        handlers::create_post, handlers::get_post, handlers::update_post,
        handlers::delete_post, handlers::debug_vars
    ),
    components(
        schemas(
            models::Role, models::User, models::Post, models::RegisterUserPayload,
            models::CreateTokenPayload, models::CreatePostPayload, models::UpdatePostPayload,
            models::UserWithToken, models::HealthStatus, models::DebugVars,
        )
    ),
    tags(
        (name = "gopher-social", description = "GopherSocial API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Single shared container for every service a request may need. All members are
/// cheap to clone (`Arc`s or structs of `Arc`s).
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub cache: CacheState,
    pub mailer: MailerState,
    pub authenticator: AuthenticatorState,
    pub resolver: UserResolver,
    pub authorizer: RoleAuthorizer,
    pub registration: RegistrationFlow,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the derived services (authenticator, resolver, authorizer, registration)
    /// from the three injected collaborators and the configuration.
    pub fn new(config: AppConfig, repo: RepositoryState, cache: CacheState, mailer: MailerState) -> Self {
        let authenticator = Arc::new(JwtAuthenticator::from_config(&config.token));
        let resolver = UserResolver::new(repo.clone(), cache.clone(), config.query_timeout);
        let authorizer = RoleAuthorizer::new(repo.clone());
        let registration = RegistrationFlow::new(repo.clone(), mailer.clone(), &config);

        Self {
            repo,
            cache,
            mailer,
            authenticator,
            resolver,
            authorizer,
            registration,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for AuthenticatorState {
    fn from_ref(app_state: &AppState) -> AuthenticatorState {
        app_state.authenticator.clone()
    }
}

impl FromRef<AppState> for UserResolver {
    fn from_ref(app_state: &AppState) -> UserResolver {
        app_state.resolver.clone()
    }
}

impl FromRef<AppState> for RoleAuthorizer {
    fn from_ref(app_state: &AppState) -> RoleAuthorizer {
        app_state.authorizer.clone()
    }
}

/// create_router
///
/// Assembles the routing tree, applies the per-group guards and the global
/// observability layers, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        // Bearer session required. The guard attaches the resolved `AuthUser`.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_bearer,
            )),
        )
        // Static Basic credential; no user identity involved.
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.config.clone(),
                basic_auth::require_basic_auth,
            )),
        )
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of one request carries its `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
