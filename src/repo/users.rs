//! UserRepository (C3): cold-storage user CRUD and credential checks.
//! Grounded on `examples/original_source/src/model/UserModel.cpp`
//! (`verifyLogin`, `registerUser`, `isUserExists`, `isEmailExists`,
//! `getUserByName`/`getUserById`, `updateUserOnlineState`,
//! `updateUserLoginTime`, `getOnlineUsers`), ported onto `sqlx`/Postgres in
//! the non-macro `sqlx::query(...).get(...)` style used by the teacher's
//! `repo/races.rs`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::password::{hash_password, verify_password};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub avatar: String,
    pub verified: bool,
    pub online: bool,
    pub last_login_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created(i64),
    UsernameExists,
    EmailExists,
}

fn row_to_user(row: sqlx::postgres::PgRow) -> UserRow {
    UserRow {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        avatar: row.get("avatar"),
        verified: row.get("verified"),
        online: row.get("online"),
        last_login_time: row.get("last_login_time"),
        create_time: row.get("create_time"),
    }
}

const USER_COLUMNS: &str =
    "id, username, email, avatar, verified, online, last_login_time, create_time";

pub async fn username_exists(pool: &PgPool, username: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1) AS exists")
        .bind(username)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<bool, _>("exists"))
}

pub async fn email_exists(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1) AS exists")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<bool, _>("exists"))
}

/// Registers a new user. Checked in username-then-email order, matching
/// the original's `ChatServer::handleRegister` error precedence.
pub async fn register(
    pool: &PgPool,
    username: &str,
    password: &str,
    email: &str,
    avatar: Option<&str>,
) -> Result<RegisterOutcome, sqlx::Error> {
    if username_exists(pool, username).await? {
        return Ok(RegisterOutcome::UsernameExists);
    }
    if email_exists(pool, email).await? {
        return Ok(RegisterOutcome::EmailExists);
    }

    let hashed = hash_password(password);
    let row = sqlx::query(
        "INSERT INTO users (username, password, email, avatar, verified) \
         VALUES ($1, $2, $3, $4, TRUE) RETURNING id",
    )
    .bind(username)
    .bind(hashed)
    .bind(email)
    .bind(avatar.unwrap_or(""))
    .fetch_one(pool)
    .await?;

    Ok(RegisterOutcome::Created(row.get("id")))
}

/// Verifies credentials and, on success, atomically marks the user online
/// and bumps `last_login_time` in one transaction.
pub async fn verify_credentials(
    pool: &PgPool,
    username: &str,
    password: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query("SELECT id, password FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let id: i64 = row.get("id");
    let stored_password: String = row.get("password");
    if !verify_password(password, &stored_password) {
        return Ok(None);
    }

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET online = TRUE, last_login_time = now() WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Some(id))
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(row_to_user))
}

pub async fn find_by_id(pool: &PgPool, user_id: i64) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(row_to_user))
}

pub async fn set_online(pool: &PgPool, user_id: i64, online: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET online = $1 WHERE id = $2")
        .bind(online)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_last_login(pool: &PgPool, user_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login_time = now() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_online(pool: &PgPool) -> Result<Vec<UserRow>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE online = TRUE ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_user).collect())
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<UserRow>, sqlx::Error> {
    let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(row_to_user).collect())
}
