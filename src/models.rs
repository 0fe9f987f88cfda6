use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// A named rung in the role ladder. Higher `level` strictly dominates lower levels,
/// which is what the `RoleAuthorizer` compares when ownership alone does not grant access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Role {
    pub id: i64,
    // Unique: 'user', 'moderator', 'admin'.
    pub name: String,
    pub level: i32,
    pub description: String,
}

/// User
///
/// The canonical identity record. Cached copies handed out by the `UserResolver`
/// are read-only snapshots; all mutation goes through the `Repository`.
#[derive(Debug, Clone, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    // Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// UserRow
///
/// Flat projection of `users JOIN roles`, folded into a `User` by the repository.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub role_id: i64,
    pub role_name: String,
    pub role_level: i32,
    pub role_description: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password,
            role: Role {
                id: row.role_id,
                name: row.role_name,
                level: row.role_level,
                description: row.role_description,
            },
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// NewUser
///
/// Everything the store needs to insert a pending identity. The password has already
/// been hashed by the time this struct exists.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role_name: String,
}

/// Invitation
///
/// Pending activation for exactly one identity. Only the SHA-256 of the plaintext
/// token is ever stored.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Post
///
/// The owned resource guarded by ownership/role precedence on mutation.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Post {
    pub id: i64,
    // FK to users.id (Owner).
    pub user_id: i64,
    pub title: String,
    pub content: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterUserPayload
///
/// Input payload for POST /authentication/user.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterUserPayload {
    #[schema(example = "gopher")]
    pub username: String,
    #[schema(example = "g@example.com")]
    pub email: String,
    pub password: String,
}

/// CreateTokenPayload
///
/// Input payload for POST /authentication/token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateTokenPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreatePostPayload {
    pub title: String,
    pub content: String,
}

/// UpdatePostPayload
///
/// Partial update for PATCH /posts/{id}; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdatePostPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// --- Response Payloads ---

/// UserWithToken
///
/// Registration response. `token` is the one-time plaintext invitation token and is
/// never retrievable again after this response.
#[derive(Debug, Clone, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct UserWithToken {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
    pub activation_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct HealthStatus {
    pub status: String,
    pub env: String,
    pub version: String,
}

/// DebugVars
///
/// Operational snapshot exposed behind the static admin credential.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DebugVars {
    pub version: String,
    pub env: String,
    pub cache_enabled: bool,
    pub token_ttl_secs: u64,
    pub invitation_ttl_secs: u64,
}
