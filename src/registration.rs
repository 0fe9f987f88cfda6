use std::{sync::LazyLock, time::Duration};

use chrono::Utc;
use regex::Regex;

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    mailer::{MailerState, OutgoingEmail},
    models::{NewUser, RegisterUserPayload, UserWithToken},
    password::{generate_invitation_token, hash_token, spawn_hash_password},
    repository::{RepoError, RepositoryState},
};

/// Role every self-registered identity starts with.
pub const DEFAULT_ROLE: &str = "user";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// validate_registration
///
/// username: required, ≤100 chars. email: required, valid, ≤100 chars.
/// password: 3..=100 chars.
pub fn validate_registration(payload: &RegisterUserPayload) -> Result<(), AppError> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("username is required".into()));
    }
    if username.chars().count() > 100 {
        return Err(AppError::Validation("username must be at most 100 characters".into()));
    }
    if payload.email.is_empty() {
        return Err(AppError::Validation("email is required".into()));
    }
    if payload.email.chars().count() > 100 || !is_valid_email(&payload.email) {
        return Err(AppError::Validation("email must be a valid address of at most 100 characters".into()));
    }
    let password_len = payload.password.chars().count();
    if !(3..=100).contains(&password_len) {
        return Err(AppError::Validation("password must be between 3 and 100 characters".into()));
    }
    Ok(())
}

/// RegistrationFlow
///
/// Received → Validated → Persisted → EmailSent → Completed. If the welcome email
/// cannot be sent the freshly created identity is deleted again (best effort) and
/// the caller gets an internal error, so a successful response always means the
/// identity exists *and* an activation email went out.
#[derive(Clone)]
pub struct RegistrationFlow {
    repo: RepositoryState,
    mailer: MailerState,
    invitation_ttl: Duration,
    frontend_url: String,
    sandbox: bool,
}

impl RegistrationFlow {
    pub fn new(repo: RepositoryState, mailer: MailerState, config: &AppConfig) -> Self {
        Self {
            repo,
            mailer,
            invitation_ttl: config.mail.invitation_ttl,
            frontend_url: config.frontend_url.clone(),
            sandbox: config.env != Env::Production,
        }
    }

    pub async fn register(&self, payload: RegisterUserPayload) -> Result<UserWithToken, AppError> {
        validate_registration(&payload)?;

        let username = payload.username.trim().to_string();
        let plain_token = generate_invitation_token();
        let activation_url = format!("{}/confirm/{}", self.frontend_url, plain_token);
        let email = OutgoingEmail::welcome(&username, &payload.email, &activation_url)?;

        let new_user = NewUser {
            username,
            email: payload.email,
            password_hash: spawn_hash_password(payload.password).await?,
            role_name: DEFAULT_ROLE.to_string(),
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.invitation_ttl)
                .map_err(|e| AppError::internal(format!("compute invitation expiry: {e}")))?;

        let user = self
            .repo
            .create_and_invite(new_user, &hash_token(&plain_token), expires_at)
            .await
            .map_err(|e| match e {
                RepoError::DuplicateEmail | RepoError::DuplicateUsername => AppError::from(e),
                other => AppError::internal(format!("create user and invitation: {other}")),
            })?;

        // Once the identity exists, delivery and rollback run to completion even
        // if the caller goes away.
        let delivery = tokio::spawn(deliver_or_roll_back(
            self.repo.clone(),
            self.mailer.clone(),
            email,
            user.id,
            self.sandbox,
        ));
        delivery
            .await
            .map_err(|e| AppError::internal(format!("join welcome email task: {e}")))??;

        Ok(UserWithToken {
            user,
            token: plain_token,
            activation_url,
        })
    }
}

async fn deliver_or_roll_back(
    repo: RepositoryState,
    mailer: MailerState,
    email: OutgoingEmail,
    user_id: i64,
    sandbox: bool,
) -> Result<(), AppError> {
    match mailer.send(&email, sandbox).await {
        Ok(status) => {
            tracing::info!(user_id, status, sandbox, "welcome email sent");
            Ok(())
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "error sending welcome email");
            if let Err(delete_err) = repo.delete_user(user_id).await {
                tracing::error!(user_id, error = %delete_err, "error rolling back user after email failure");
            }
            Err(AppError::from(e))
        }
    }
}
