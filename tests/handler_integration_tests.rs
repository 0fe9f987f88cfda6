mod common;

use async_trait::async_trait;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use gopher_social::{
    auth::AuthUser,
    authorization::RoleAuthorizer,
    cache::{CacheError, CacheState, NoopUserCache, UserCache},
    error::AppError,
    handlers,
    models::{CreatePostPayload, CreateTokenPayload, RegisterUserPayload, UpdatePostPayload, User},
    password::hash_password,
    repository::{InMemoryRepository, Repository, RepositoryState},
    resolver::UserResolver,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{context, seed_user};

// --- Cache Doubles ---

struct FailingCache;

#[async_trait]
impl UserCache for FailingCache {
    async fn get(&self, _id: i64) -> Result<Option<User>, CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }
    async fn set(&self, _user: &User) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }
}

struct StallingCache;

#[async_trait]
impl UserCache for StallingCache {
    async fn get(&self, _id: i64) -> Result<Option<User>, CacheError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }
    async fn set(&self, _user: &User) -> Result<(), CacheError> {
        Ok(())
    }
}

fn resolver_with(repo: Arc<InMemoryRepository>, cache: CacheState) -> UserResolver {
    UserResolver::new(repo as RepositoryState, cache, Duration::from_millis(200))
}

// --- UserResolver ---

#[tokio::test]
async fn test_resolver_cache_hit_skips_store() {
    let ctx = context();
    let user = seed_user(&ctx.repo, "gopher", "user", "hash", true).await;

    let first = ctx.state.resolver.resolve(user.id).await.unwrap();
    let second = ctx.state.resolver.resolve(user.id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.role.level, 1);
    assert_eq!(ctx.repo.user_lookups(), 1);
}

#[tokio::test]
async fn test_resolver_unknown_id_is_not_found_and_not_cached() {
    let ctx = context();

    assert!(matches!(ctx.state.resolver.resolve(404).await, Err(AppError::NotFound)));
    assert!(matches!(ctx.state.resolver.resolve(404).await, Err(AppError::NotFound)));
    assert_eq!(ctx.repo.user_lookups(), 2);
}

#[tokio::test]
async fn test_resolver_without_cache_always_reads_store() {
    let repo = Arc::new(InMemoryRepository::new());
    let user = seed_user(&repo, "gopher", "user", "hash", true).await;
    let resolver = resolver_with(repo.clone(), Arc::new(NoopUserCache));

    resolver.resolve(user.id).await.unwrap();
    resolver.resolve(user.id).await.unwrap();

    assert_eq!(repo.user_lookups(), 2);
}

#[tokio::test]
async fn test_resolver_cache_failure_is_internal() {
    let repo = Arc::new(InMemoryRepository::new());
    let user = seed_user(&repo, "gopher", "user", "hash", true).await;
    let resolver = resolver_with(repo.clone(), Arc::new(FailingCache));

    let result = resolver.resolve(user.id).await;
    assert!(matches!(result, Err(AppError::Internal { .. })));
    assert_eq!(repo.user_lookups(), 0);
}

#[tokio::test]
async fn test_resolver_bounds_slow_cache() {
    let repo = Arc::new(InMemoryRepository::new());
    let user = seed_user(&repo, "gopher", "user", "hash", true).await;
    let resolver = resolver_with(repo, Arc::new(StallingCache));

    let result = tokio::time::timeout(Duration::from_secs(5), resolver.resolve(user.id))
        .await
        .expect("resolver must give up on its own");
    assert!(matches!(result, Err(AppError::Internal { .. })));
}

// --- RoleAuthorizer ---

#[tokio::test]
async fn test_owner_is_always_allowed() {
    let repo = Arc::new(InMemoryRepository::new());
    let owner = seed_user(&repo, "owner", "user", "hash", true).await;
    let authorizer = RoleAuthorizer::new(repo as RepositoryState);

    assert!(authorizer.authorize(&owner, owner.id, "admin").await.is_ok());
}

#[tokio::test]
async fn test_role_precedence_ladder() {
    let repo = Arc::new(InMemoryRepository::new());
    let user = seed_user(&repo, "plain", "user", "hash", true).await;
    let moderator = seed_user(&repo, "mod", "moderator", "hash", true).await;
    let admin = seed_user(&repo, "root", "admin", "hash", true).await;
    let authorizer = RoleAuthorizer::new(repo as RepositoryState);

    assert!(authorizer.check_role_precedence(&user, "user").await.unwrap());
    assert!(!authorizer.check_role_precedence(&user, "moderator").await.unwrap());

    assert!(authorizer.check_role_precedence(&moderator, "moderator").await.unwrap());
    assert!(!authorizer.check_role_precedence(&moderator, "admin").await.unwrap());

    assert!(authorizer.check_role_precedence(&admin, "moderator").await.unwrap());
    assert!(authorizer.check_role_precedence(&admin, "admin").await.unwrap());
}

#[tokio::test]
async fn test_insufficient_role_is_forbidden() {
    let repo = Arc::new(InMemoryRepository::new());
    let owner = seed_user(&repo, "owner", "user", "hash", true).await;
    let other = seed_user(&repo, "other", "user", "hash", true).await;
    let authorizer = RoleAuthorizer::new(repo as RepositoryState);

    let result = authorizer.authorize(&other, owner.id, "moderator").await;
    assert!(matches!(result, Err(AppError::Forbidden)));
}

#[tokio::test]
async fn test_unknown_role_is_internal() {
    let repo = Arc::new(InMemoryRepository::new());
    let admin = seed_user(&repo, "root", "admin", "hash", true).await;
    let authorizer = RoleAuthorizer::new(repo as RepositoryState);

    let result = authorizer.check_role_precedence(&admin, "superuser").await;
    assert!(matches!(result, Err(AppError::Internal { .. })));
}

// --- Token Issuance ---

fn token_payload(email: &str, password: &str) -> CreateTokenPayload {
    CreateTokenPayload {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_create_token_for_active_user() {
    let ctx = context();
    let hash = hash_password("correct-horse").unwrap();
    let user = seed_user(&ctx.repo, "gopher", "user", &hash, true).await;

    let (status, Json(token)) = handlers::create_token(
        State(ctx.state.clone()),
        Json(token_payload("gopher@example.com", "correct-horse")),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    let claims = ctx.state.authenticator.validate_token(&token).unwrap();
    assert_eq!(claims.sub, user.id.to_string());
}

#[tokio::test]
async fn test_create_token_rejects_bad_credentials_uniformly() {
    let ctx = context();
    let hash = hash_password("correct-horse").unwrap();
    seed_user(&ctx.repo, "gopher", "user", &hash, true).await;
    seed_user(&ctx.repo, "sleepy", "user", &hash, false).await;

    let attempts = [
        token_payload("gopher@example.com", "wrong-horse"),
        token_payload("nobody@example.com", "correct-horse"),
        token_payload("sleepy@example.com", "correct-horse"),
    ];

    for payload in attempts {
        let email = payload.email.clone();
        let result = handlers::create_token(State(ctx.state.clone()), Json(payload)).await;
        assert!(
            matches!(result, Err(AppError::Unauthenticated)),
            "{email} should not receive a token"
        );
    }
}

#[tokio::test]
async fn test_unknown_email_costs_a_password_check() {
    let ctx = context();
    let hash = hash_password("correct-horse").unwrap();
    seed_user(&ctx.repo, "gopher", "user", &hash, true).await;

    let fastest = |email: &'static str| {
        let state = ctx.state.clone();
        async move {
            let mut best = Duration::MAX;
            for _ in 0..3 {
                let started = Instant::now();
                let result = handlers::create_token(
                    State(state.clone()),
                    Json(token_payload(email, "wrong-horse")),
                )
                .await;
                assert!(matches!(result, Err(AppError::Unauthenticated)));
                best = best.min(started.elapsed());
            }
            best
        }
    };

    // Warm the stand-in hash before timing.
    fastest("nobody@example.com").await;
    let known = fastest("gopher@example.com").await;
    let unknown = fastest("nobody@example.com").await;

    assert!(
        unknown * 4 >= known,
        "unknown email answered in {unknown:?}, known email in {known:?}"
    );
}

#[tokio::test]
async fn test_create_token_validates_payload() {
    let ctx = context();

    let short = handlers::create_token(
        State(ctx.state.clone()),
        Json(token_payload("gopher@example.com", "ab")),
    )
    .await;
    let bad_email = handlers::create_token(
        State(ctx.state.clone()),
        Json(token_payload("not-an-email", "password")),
    )
    .await;

    assert!(matches!(short, Err(AppError::Validation(_))));
    assert!(matches!(bad_email, Err(AppError::Validation(_))));
}

// --- Activation ---

#[tokio::test]
async fn test_activation_consumes_invitation() {
    let ctx = context();
    let created = ctx
        .state
        .registration
        .register(RegisterUserPayload {
            username: "newbie".to_string(),
            email: "newbie@example.com".to_string(),
            password: "password".to_string(),
        })
        .await
        .unwrap();

    let status = handlers::activate_user(State(ctx.state.clone()), Path(created.token.clone()))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(ctx.repo.get_user_by_id(created.user.id).await.unwrap().is_active);

    let again = handlers::activate_user(State(ctx.state.clone()), Path(created.token)).await;
    assert!(matches!(again, Err(AppError::NotFound)));
}

#[tokio::test]
async fn test_activation_with_unknown_token_is_not_found() {
    let ctx = context();
    let result = handlers::activate_user(State(ctx.state.clone()), Path("no-such-token".to_string())).await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

// --- Users ---

#[tokio::test]
async fn test_get_user_unknown_id_is_not_found() {
    let ctx = context();
    let caller = seed_user(&ctx.repo, "gopher", "user", "hash", true).await;

    let result = handlers::get_user(
        AuthUser(caller),
        State(ctx.state.resolver.clone()),
        Path(12345),
    )
    .await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

// --- Posts ---

async fn seed_post(ctx: &common::TestContext, owner: &User) -> i64 {
    let (_, Json(post)) = handlers::create_post(
        AuthUser(owner.clone()),
        State(ctx.state.clone()),
        Json(CreatePostPayload {
            title: "Hello".to_string(),
            content: "First post".to_string(),
        }),
    )
    .await
    .unwrap();
    post.id
}

#[tokio::test]
async fn test_create_post_validates_fields() {
    let ctx = context();
    let owner = seed_user(&ctx.repo, "owner", "user", "hash", true).await;

    let result = handlers::create_post(
        AuthUser(owner),
        State(ctx.state.clone()),
        Json(CreatePostPayload {
            title: "x".repeat(101),
            content: "body".to_string(),
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_update_post_requires_owner_or_moderator() {
    let ctx = context();
    let owner = seed_user(&ctx.repo, "owner", "user", "hash", true).await;
    let stranger = seed_user(&ctx.repo, "stranger", "user", "hash", true).await;
    let moderator = seed_user(&ctx.repo, "mod", "moderator", "hash", true).await;
    let post_id = seed_post(&ctx, &owner).await;

    let edit = || UpdatePostPayload {
        title: Some("Edited".to_string()),
        content: None,
    };

    let denied = handlers::update_post(AuthUser(stranger), State(ctx.state.clone()), Path(post_id), Json(edit())).await;
    assert!(matches!(denied, Err(AppError::Forbidden)));

    let Json(by_mod) = handlers::update_post(AuthUser(moderator), State(ctx.state.clone()), Path(post_id), Json(edit()))
        .await
        .unwrap();
    assert_eq!(by_mod.title, "Edited");
    assert_eq!(by_mod.content, "First post");

    let Json(by_owner) = handlers::update_post(AuthUser(owner), State(ctx.state.clone()), Path(post_id), Json(edit()))
        .await
        .unwrap();
    assert_eq!(by_owner.user_id, by_mod.user_id);
}

#[tokio::test]
async fn test_delete_post_requires_owner_or_admin() {
    let ctx = context();
    let owner = seed_user(&ctx.repo, "owner", "user", "hash", true).await;
    let moderator = seed_user(&ctx.repo, "mod", "moderator", "hash", true).await;
    let admin = seed_user(&ctx.repo, "root", "admin", "hash", true).await;
    let post_id = seed_post(&ctx, &owner).await;

    let denied = handlers::delete_post(AuthUser(moderator), State(ctx.state.clone()), Path(post_id)).await;
    assert!(matches!(denied, Err(AppError::Forbidden)));

    let status = handlers::delete_post(AuthUser(admin.clone()), State(ctx.state.clone()), Path(post_id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let gone = handlers::delete_post(AuthUser(admin), State(ctx.state.clone()), Path(post_id)).await;
    assert!(matches!(gone, Err(AppError::NotFound)));
}
