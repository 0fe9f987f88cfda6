use gopher_social::{
    AppState,
    cache::{CacheState, MokaUserCache, NoopUserCache},
    config::{AppConfig, Env},
    create_router,
    mailer::{MailerState, RetryPolicy, SendGridMailer},
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Startup order: configuration, logging, database, cache, mailer, then the HTTP server.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gopher_social=debug,tower_http=info,axum=trace".into());

    // 3. Log format follows the environment: pretty locally, JSON in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Database Initialization (Postgres)
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    let repo = Arc::new(PostgresRepository::new(pool, config.query_timeout)) as RepositoryState;

    // 5. Identity Cache
    let cache: CacheState = if config.cache.enabled {
        tracing::info!(
            ttl_secs = config.cache.ttl.as_secs(),
            max_entries = config.cache.max_entries,
            "identity cache enabled"
        );
        Arc::new(MokaUserCache::new(config.cache.ttl, config.cache.max_entries))
    } else {
        tracing::info!("identity cache disabled");
        Arc::new(NoopUserCache)
    };

    // 6. Mailer (SendGrid)
    let retry = RetryPolicy::new(config.mail.max_retries, config.mail.retry_base_delay);
    let mailer = SendGridMailer::new(
        &config.mail.sendgrid_api_key,
        &config.mail.from_email,
        &config.mail.from_name,
        retry,
    )
    .expect("FATAL: Failed to build the SendGrid HTTP client.");
    let mailer = Arc::new(mailer) as MailerState;

    // 7. Unified State Assembly
    let addr = config.addr.clone();
    let api_url = config.api_url.clone();
    let app_state = AppState::new(config, repo, cache, mailer);

    // 8. Router and Server Startup
    let app = create_router(app_state);

    let listener = TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: Failed to bind {addr}: {e}"));

    tracing::info!("Listening on {addr}");
    tracing::info!("API Documentation (Swagger UI) available at: {api_url}/swagger-ui");

    axum::serve(listener, app).await.unwrap();
}
