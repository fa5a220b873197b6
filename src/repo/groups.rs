//! Cold-storage side of groups: id allocation and existence checks. Group
//! membership and the message stream itself live in the hot tier
//! (`MessagingCore`); this module backs group creation (a monotonic id,
//! resolving the spec's Open Question on epoch-derived ids) and the
//! archiver's "does this group still exist" guard.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
}

pub async fn create(pool: &PgPool, name: &str, creator_id: i64) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("INSERT INTO groups (name, creator_id) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(creator_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("id"))
}

pub async fn exists(pool: &PgPool, group_id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM groups WHERE id = $1) AS exists")
        .bind(group_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<bool, _>("exists"))
}

pub async fn find(pool: &PgPool, group_id: i64) -> Result<Option<GroupRow>, sqlx::Error> {
    let row = sqlx::query("SELECT id, name, creator_id, created_at FROM groups WHERE id = $1")
        .bind(group_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| GroupRow {
        id: r.get("id"),
        name: r.get("name"),
        creator_id: r.get("creator_id"),
        created_at: r.get("created_at"),
    }))
}

pub async fn delete(pool: &PgPool, group_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM groups WHERE id = $1")
        .bind(group_id)
        .execute(pool)
        .await?;
    Ok(())
}
