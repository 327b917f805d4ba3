use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::{
    auth::repo_types::{NewUser, User},
    db::{is_unique_violation, timed, StoreError},
};

/// Persistence the identity service needs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a user. A taken login is `StoreError::DuplicateLogin`.
    async fn create_user(&self, user: &NewUser) -> Result<i64, StoreError>;
    /// Find a user by login.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;
    /// Whether a user with exactly this login and derived hash exists.
    async fn user_registered(&self, login: &str, password_hash: &[u8]) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
    timeout: Duration,
}

impl PgCredentialStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create_user(&self, user: &NewUser) -> Result<i64, StoreError> {
        timed(self.timeout, async {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO users (login, full_name, email, password_hash, password_salt)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(&user.login)
            .bind(&user.full_name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.password_salt)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateLogin
                } else {
                    StoreError::Db(e)
                }
            })?;
            Ok::<_, StoreError>(id)
        })
        .await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        timed(self.timeout, async {
            let user = sqlx::query_as::<_, User>(
                r#"
                SELECT id, login, full_name, email, password_hash, password_salt, created_at
                FROM users
                WHERE login = $1
                "#,
            )
            .bind(login)
            .fetch_optional(&self.db)
            .await?;
            Ok::<_, StoreError>(user)
        })
        .await
    }

    async fn user_registered(&self, login: &str, password_hash: &[u8]) -> Result<bool, StoreError> {
        timed(self.timeout, async {
            let found: Option<i32> = sqlx::query_scalar(
                r#"SELECT 1 FROM users WHERE login = $1 AND password_hash = $2 LIMIT 1"#,
            )
            .bind(login)
            .bind(password_hash)
            .fetch_optional(&self.db)
            .await?;
            Ok::<_, StoreError>(found.is_some())
        })
        .await
    }
}
