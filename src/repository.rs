use crate::models::{
    CreatePostPayload, Invitation, NewUser, Post, Role, UpdatePostPayload, User, UserRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;

/// RepoError
///
/// Store-level error classifier. Driver specifics (Postgres error codes, constraint
/// names) are folded into these kinds here so nothing above the repository depends
/// on a particular persistence technology.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("duplicate username")]
    DuplicateUsername,
    #[error("store call exceeded its timeout")]
    Timeout,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

/// classify_store_error
///
/// Maps the driver errors the core cares about onto `RepoError` kinds. Returns
/// `None` for anything that is just an opaque database failure.
pub fn classify_store_error(err: &sqlx::Error) -> Option<RepoError> {
    match err {
        sqlx::Error::RowNotFound => Some(RepoError::NotFound),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => match db_err.constraint() {
            Some(c) if c.contains("email") => Some(RepoError::DuplicateEmail),
            Some(c) if c.contains("username") => Some(RepoError::DuplicateUsername),
            _ => None,
        },
        _ => None,
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match classify_store_error(&err) {
            Some(kind) => kind,
            None => RepoError::Database(err),
        }
    }
}

/// with_timeout
///
/// Bounds a store call. Dropping the returned future (e.g. the client went away)
/// drops the in-flight query with it.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RepoError::Timeout),
    }
}

/// Repository Trait
///
/// Abstract contract for all persistence operations the core consumes. Handlers and
/// core components only ever see `Arc<dyn Repository>`, so Postgres and the in-memory
/// store are interchangeable.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user_by_id(&self, id: i64) -> Result<User, RepoError>;
    async fn get_user_by_email(&self, email: &str) -> Result<User, RepoError>;
    /// Creates the identity and its invitation atomically: either both exist afterwards or neither.
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<User, RepoError>;
    /// Activates the identity owning a non-expired invitation with this hash and consumes it.
    async fn activate(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), RepoError>;
    async fn delete_user(&self, id: i64) -> Result<(), RepoError>;

    // --- Roles ---
    async fn get_role_by_name(&self, name: &str) -> Result<Role, RepoError>;

    // --- Posts ---
    async fn create_post(&self, user_id: i64, payload: CreatePostPayload) -> Result<Post, RepoError>;
    async fn get_post(&self, id: i64) -> Result<Post, RepoError>;
    async fn update_post(&self, id: i64, payload: UpdatePostPayload) -> Result<Post, RepoError>;
    async fn delete_post(&self, id: i64) -> Result<(), RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_SELECT: &str = r#"
    SELECT
        u.id, u.username, u.email, u.password, u.is_active, u.created_at,
        r.id AS role_id, r.name AS role_name, r.level AS role_level,
        r.description AS role_description
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

const POST_COLUMNS: &str = "id, user_id, title, content, created_at, updated_at";

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// Every call is bounded by `query_timeout`.
pub struct PostgresRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresRepository {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user_by_id(&self, id: i64) -> Result<User, RepoError> {
        with_timeout(self.query_timeout, async {
            let row = sqlx::query_as::<_, UserRow>(&format!("{USER_SELECT} WHERE u.id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            Ok::<_, RepoError>(User::from(row))
        })
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, RepoError> {
        with_timeout(self.query_timeout, async {
            let row = sqlx::query_as::<_, UserRow>(&format!("{USER_SELECT} WHERE u.email = $1"))
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
            Ok::<_, RepoError>(User::from(row))
        })
        .await
    }

    /// create_and_invite
    ///
    /// Runs in one transaction. A unique violation on `users_email_key` /
    /// `users_username_key` rolls everything back and surfaces as a duplicate kind.
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<User, RepoError> {
        with_timeout(self.query_timeout, async {
            let mut tx = self.pool.begin().await?;

            let role = sqlx::query_as::<_, Role>(
                "SELECT id, name, level, description FROM roles WHERE name = $1",
            )
            .bind(&user.role_name)
            .fetch_one(&mut *tx)
            .await?;

            let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
                r#"
                INSERT INTO users (username, email, password, role_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(role.id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO user_invitations (token, user_id, expiry) VALUES ($1, $2, $3)")
                .bind(token_hash)
                .bind(id)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            Ok::<_, RepoError>(User {
                id,
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                role,
                is_active: false,
                created_at,
            })
        })
        .await
    }

    async fn activate(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), RepoError> {
        with_timeout(self.query_timeout, async {
            let mut tx = self.pool.begin().await?;

            let user_id: i64 = sqlx::query_scalar(
                "SELECT user_id FROM user_invitations WHERE token = $1 AND expiry > $2",
            )
            .bind(token_hash)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, RepoError>(())
        })
        .await
    }

    /// delete_user
    ///
    /// Invitations go with the user through `ON DELETE CASCADE`.
    async fn delete_user(&self, id: i64) -> Result<(), RepoError> {
        with_timeout(self.query_timeout, async {
            let result = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, RepoError> {
        with_timeout(self.query_timeout, async {
            let role = sqlx::query_as::<_, Role>(
                "SELECT id, name, level, description FROM roles WHERE name = $1",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
            Ok::<_, RepoError>(role)
        })
        .await
    }

    async fn create_post(&self, user_id: i64, payload: CreatePostPayload) -> Result<Post, RepoError> {
        with_timeout(self.query_timeout, async {
            let post = sqlx::query_as::<_, Post>(&format!(
                "INSERT INTO posts (user_id, title, content) VALUES ($1, $2, $3) RETURNING {POST_COLUMNS}"
            ))
            .bind(user_id)
            .bind(payload.title)
            .bind(payload.content)
            .fetch_one(&self.pool)
            .await?;
            Ok::<_, RepoError>(post)
        })
        .await
    }

    async fn get_post(&self, id: i64) -> Result<Post, RepoError> {
        with_timeout(self.query_timeout, async {
            let post = sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            Ok::<_, RepoError>(post)
        })
        .await
    }

    /// update_post
    ///
    /// Uses COALESCE so absent fields keep their stored value.
    async fn update_post(&self, id: i64, payload: UpdatePostPayload) -> Result<Post, RepoError> {
        with_timeout(self.query_timeout, async {
            let post = sqlx::query_as::<_, Post>(&format!(
                r#"
                UPDATE posts
                SET title = COALESCE($2, title),
                    content = COALESCE($3, content),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {POST_COLUMNS}
                "#
            ))
            .bind(id)
            .bind(payload.title)
            .bind(payload.content)
            .fetch_one(&self.pool)
            .await?;
            Ok::<_, RepoError>(post)
        })
        .await
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        with_timeout(self.query_timeout, async {
            let result = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        })
        .await
    }
}

// --- In-Memory Implementation ---

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, User>,
    invitations: Vec<Invitation>,
    roles: Vec<Role>,
    posts: HashMap<i64, Post>,
    next_user_id: i64,
    next_post_id: i64,
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. Enforces the same uniqueness and
/// atomicity rules as the Postgres schema, and counts `get_user_by_id` calls so
/// cache-aside behaviour can be observed from tests.
pub struct InMemoryRepository {
    state: RwLock<MemoryState>,
    user_lookups: AtomicUsize,
    fail_user_deletes: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        let state = MemoryState {
            roles: Self::default_roles(),
            next_user_id: 1,
            next_post_id: 1,
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
            user_lookups: AtomicUsize::new(0),
            fail_user_deletes: AtomicBool::new(false),
        }
    }

    /// The same ladder seeded by `migrations/0001_init.sql`.
    pub fn default_roles() -> Vec<Role> {
        vec![
            Role {
                id: 1,
                name: "user".to_string(),
                level: 1,
                description: "A user can create posts and comments".to_string(),
            },
            Role {
                id: 2,
                name: "moderator".to_string(),
                level: 2,
                description: "A moderator can update other users posts".to_string(),
            },
            Role {
                id: 3,
                name: "admin".to_string(),
                level: 3,
                description: "An admin can update and delete other users posts".to_string(),
            },
        ]
    }

    /// Number of times `get_user_by_id` reached the store.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `delete_user` fail with a database-style error.
    pub fn set_fail_user_deletes(&self, fail: bool) {
        self.fail_user_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn invitations_for(&self, user_id: i64) -> Vec<Invitation> {
        let state = self.state.read().await;
        state
            .invitations
            .iter()
            .filter(|inv| inv.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Inserts an identity directly, bypassing registration. Intended for seeding.
    pub async fn insert_user(&self, user: NewUser, is_active: bool) -> Result<User, RepoError> {
        let mut state = self.state.write().await;
        let created = Self::insert_locked(&mut state, user)?;
        if is_active {
            if let Some(stored) = state.users.get_mut(&created.id) {
                stored.is_active = true;
                return Ok(stored.clone());
            }
        }
        Ok(created)
    }

    fn insert_locked(state: &mut MemoryState, user: NewUser) -> Result<User, RepoError> {
        if state.users.values().any(|u| u.email == user.email) {
            return Err(RepoError::DuplicateEmail);
        }
        if state.users.values().any(|u| u.username == user.username) {
            return Err(RepoError::DuplicateUsername);
        }
        let role = state
            .roles
            .iter()
            .find(|r| r.name == user.role_name)
            .cloned()
            .ok_or(RepoError::NotFound)?;

        let id = state.next_user_id;
        state.next_user_id += 1;

        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role,
            is_active: false,
            created_at: Utc::now(),
        };
        state.users.insert(id, created.clone());
        Ok(created)
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user_by_id(&self, id: i64) -> Result<User, RepoError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        state.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, RepoError> {
        let state = self.state.read().await;
        state
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<User, RepoError> {
        // One write guard covers both inserts, so concurrent duplicates serialise here.
        let mut state = self.state.write().await;
        let created = Self::insert_locked(&mut state, user)?;
        state.invitations.push(Invitation {
            user_id: created.id,
            token_hash: token_hash.to_string(),
            expires_at,
        });
        Ok(created)
    }

    async fn activate(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let user_id = state
            .invitations
            .iter()
            .find(|inv| inv.token_hash == token_hash && inv.expires_at > now)
            .map(|inv| inv.user_id)
            .ok_or(RepoError::NotFound)?;

        let user = state.users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
        user.is_active = true;
        state.invitations.retain(|inv| inv.user_id != user_id);
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<(), RepoError> {
        if self.fail_user_deletes.load(Ordering::SeqCst) {
            return Err(RepoError::Database(sqlx::Error::PoolClosed));
        }
        let mut state = self.state.write().await;
        if state.users.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }
        state.invitations.retain(|inv| inv.user_id != id);
        Ok(())
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, RepoError> {
        let state = self.state.read().await;
        state
            .roles
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn create_post(&self, user_id: i64, payload: CreatePostPayload) -> Result<Post, RepoError> {
        let mut state = self.state.write().await;
        let id = state.next_post_id;
        state.next_post_id += 1;
        let now = Utc::now();
        let post = Post {
            id,
            user_id,
            title: payload.title,
            content: payload.content,
            created_at: now,
            updated_at: now,
        };
        state.posts.insert(id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: i64) -> Result<Post, RepoError> {
        let state = self.state.read().await;
        state.posts.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_post(&self, id: i64, payload: UpdatePostPayload) -> Result<Post, RepoError> {
        let mut state = self.state.write().await;
        let post = state.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(title) = payload.title {
            post.title = title;
        }
        if let Some(content) = payload.content {
            post.content = content;
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        state.posts.remove(&id).map(|_| ()).ok_or(RepoError::NotFound)
    }
}
