#![allow(dead_code)]

use gopher_social::{
    AppState,
    cache::{CacheState, MokaUserCache},
    config::AppConfig,
    mailer::{MailerState, MockMailer},
    models::{NewUser, User},
    repository::{InMemoryRepository, RepositoryState},
};
use std::{sync::Arc, time::Duration};

pub const TEST_SECRET: &str = "test-secret-value-1234567890";

/// Handles kept alongside the state so tests can inspect the in-memory collaborators.
pub struct TestContext {
    pub state: AppState,
    pub repo: Arc<InMemoryRepository>,
    pub mailer: Arc<MockMailer>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.token.secret = TEST_SECRET.to_string();
    config.basic_auth.username = "ops".to_string();
    config.basic_auth.password = "s3cr:et".to_string();
    config
}

pub fn context_with(config: AppConfig, mailer: MockMailer) -> TestContext {
    let repo = Arc::new(InMemoryRepository::new());
    let mailer = Arc::new(mailer);
    let cache: CacheState = Arc::new(MokaUserCache::new(Duration::from_secs(60), 1_000));

    let state = AppState::new(
        config,
        repo.clone() as RepositoryState,
        cache,
        mailer.clone() as MailerState,
    );

    TestContext { state, repo, mailer }
}

pub fn context() -> TestContext {
    context_with(test_config(), MockMailer::new())
}

/// Seeds an identity directly into the store. `password_hash` is stored verbatim.
pub async fn seed_user(
    repo: &InMemoryRepository,
    username: &str,
    role: &str,
    password_hash: &str,
    is_active: bool,
) -> User {
    repo.insert_user(
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: password_hash.to_string(),
            role_name: role.to_string(),
        },
        is_active,
    )
    .await
    .expect("seed user")
}

/// A valid bearer header value for `user_id`, signed by the state's authenticator.
pub fn bearer_for(state: &AppState, user_id: i64) -> String {
    let claims = state.authenticator.claims_for(user_id);
    let token = state.authenticator.generate_token(&claims).expect("sign token");
    format!("Bearer {token}")
}
