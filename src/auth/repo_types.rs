use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub full_name: String,
    pub email: String,
    pub password_hash: Vec<u8>, // argon2id output, never serialized
    pub password_salt: Vec<u8>,
    pub created_at: OffsetDateTime,
}

/// Everything needed to insert a user; the hash is already derived.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub full_name: String,
    pub email: String,
    pub password_hash: Vec<u8>,
    pub password_salt: Vec<u8>,
}
