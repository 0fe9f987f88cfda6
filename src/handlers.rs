use crate::{
    AppState,
    auth::AuthUser,
    config::AppConfig,
    error::AppError,
    models::{
        CreatePostPayload, CreateTokenPayload, DebugVars, HealthStatus, Post, RegisterUserPayload,
        UpdatePostPayload, User, UserWithToken,
    },
    password::{hash_token, spawn_verify_password},
    registration::is_valid_email,
    repository::RepoError,
    resolver::UserResolver,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Role required to edit a post the caller does not own.
pub const UPDATE_POST_ROLE: &str = "moderator";
/// Role required to delete a post the caller does not own.
pub const DELETE_POST_ROLE: &str = "admin";

// --- Public Handlers ---

/// health_check
///
/// [Public Route] Liveness probe with the running environment and version.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthStatus))
)]
pub async fn health_check(State(config): State<AppConfig>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        env: config.env.as_str().to_string(),
        version: VERSION.to_string(),
    })
}

/// register_user
///
/// [Public Route] Creates a pending identity, stores the hashed invitation token and
/// sends the activation email. The plaintext token is only ever in this response.
#[utoipa::path(
    post,
    path = "/authentication/user",
    request_body = RegisterUserPayload,
    responses(
        (status = 201, description = "User registered", body = UserWithToken),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email or username taken"),
        (status = 500, description = "Activation email could not be sent")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserPayload>,
) -> Result<(StatusCode, Json<UserWithToken>), AppError> {
    let created = state.registration.register(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

fn validate_token_payload(payload: &CreateTokenPayload) -> Result<(), AppError> {
    if payload.email.is_empty() || payload.email.chars().count() > 255 || !is_valid_email(&payload.email) {
        return Err(AppError::Validation("email must be a valid address of at most 255 characters".into()));
    }
    let password_len = payload.password.chars().count();
    if !(3..=72).contains(&password_len) {
        return Err(AppError::Validation("password must be between 3 and 72 characters".into()));
    }
    Ok(())
}

/// create_token
///
/// [Public Route] Exchanges email + password for a signed session token. Unknown
/// email, wrong password and not-yet-activated accounts are indistinguishable (401).
#[utoipa::path(
    post,
    path = "/authentication/token",
    request_body = CreateTokenPayload,
    responses(
        (status = 201, description = "Signed session token", body = String),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Bad credentials")
    )
)]
pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenPayload>,
) -> Result<(StatusCode, Json<String>), AppError> {
    validate_token_payload(&payload)?;

    let user = match state.repo.get_user_by_email(&payload.email).await {
        Ok(user) => Some(user),
        Err(RepoError::NotFound) => None,
        Err(other) => return Err(AppError::from(other)),
    };

    // Unknown emails still pay for one verification.
    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
    let password_ok = spawn_verify_password(payload.password, stored_hash).await?;

    let user = match user {
        Some(user) if password_ok && user.is_active => user,
        _ => return Err(AppError::Unauthenticated),
    };

    let claims = state.authenticator.claims_for(user.id);
    let token = state.authenticator.generate_token(&claims)?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// activate_user
///
/// [Public Route] Redeems an invitation token. Unknown or expired tokens are 404.
#[utoipa::path(
    put,
    path = "/users/activate/{token}",
    params(("token" = String, Path, description = "Invitation token")),
    responses(
        (status = 204, description = "User activated"),
        (status = 404, description = "No valid invitation")
    )
)]
pub async fn activate_user(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    state.repo.activate(&hash_token(&token), Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Authenticated Handlers ---

/// get_me
///
/// [Authenticated Route] The caller's own identity as resolved by the bearer guard.
#[utoipa::path(
    get,
    path = "/users/me",
    responses((status = 200, description = "Current user", body = User))
)]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// get_user
///
/// [Authenticated Route] Looks up any identity through the cache-aside resolver.
/// Unlike the auth path, an unknown ID is reported as 404.
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = User),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user(
    AuthUser(_caller): AuthUser,
    State(resolver): State<UserResolver>,
    Path(id): Path<i64>,
) -> Result<Json<User>, AppError> {
    let user = resolver.resolve(id).await?;
    Ok(Json(user))
}

fn validate_post_fields(title: Option<&str>, content: Option<&str>) -> Result<(), AppError> {
    if let Some(title) = title {
        if title.trim().is_empty() || title.chars().count() > 100 {
            return Err(AppError::Validation("title is required and must be at most 100 characters".into()));
        }
    }
    if let Some(content) = content {
        if content.trim().is_empty() || content.chars().count() > 1000 {
            return Err(AppError::Validation("content is required and must be at most 1000 characters".into()));
        }
    }
    Ok(())
}

/// create_post
///
/// [Authenticated Route] The owner is always the caller.
#[utoipa::path(
    post,
    path = "/posts",
    request_body = CreatePostPayload,
    responses(
        (status = 201, description = "Created", body = Post),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn create_post(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostPayload>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    validate_post_fields(Some(&payload.title), Some(&payload.content))?;
    let post = state.repo.create_post(user.id, payload).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// get_post
///
/// [Authenticated Route] Retrieves a single post by ID.
#[utoipa::path(
    get,
    path = "/posts/{id}",
    params(("id" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = Post),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_post(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Post>, AppError> {
    Ok(Json(state.repo.get_post(id).await?))
}

/// update_post
///
/// [Authenticated Route] Owner, or anyone at `moderator` level or above.
#[utoipa::path(
    patch,
    path = "/posts/{id}",
    params(("id" = i64, Path, description = "Post ID")),
    request_body = UpdatePostPayload,
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 403, description = "Neither owner nor sufficient role"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_post(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePostPayload>,
) -> Result<Json<Post>, AppError> {
    let post = state.repo.get_post(id).await?;
    state.authorizer.authorize(&user, post.user_id, UPDATE_POST_ROLE).await?;

    validate_post_fields(payload.title.as_deref(), payload.content.as_deref())?;
    let updated = state.repo.update_post(id, payload).await?;
    Ok(Json(updated))
}

/// delete_post
///
/// [Authenticated Route] Owner, or anyone at `admin` level.
#[utoipa::path(
    delete,
    path = "/posts/{id}",
    params(("id" = i64, Path, description = "Post ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Neither owner nor sufficient role"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_post(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let post = state.repo.get_post(id).await?;
    state.authorizer.authorize(&user, post.user_id, DELETE_POST_ROLE).await?;

    state.repo.delete_post(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Admin Handlers ---

/// debug_vars
///
/// [Admin Route] Operational snapshot. Guarded by the static Basic credential, not a user session.
#[utoipa::path(
    get,
    path = "/admin/debug/vars",
    responses(
        (status = 200, description = "Runtime variables", body = DebugVars),
        (status = 401, description = "Missing or wrong admin credential")
    )
)]
pub async fn debug_vars(State(config): State<AppConfig>) -> Json<DebugVars> {
    Json(DebugVars {
        version: VERSION.to_string(),
        env: config.env.as_str().to_string(),
        cache_enabled: config.cache.enabled,
        token_ttl_secs: config.token.ttl.as_secs(),
        invitation_ttl_secs: config.mail.invitation_ttl.as_secs(),
    })
}
