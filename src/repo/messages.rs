//! Cold-storage archive tables (`private_messages`, `group_messages`) and
//! the most-recent-first history reads that back [`crate::messaging`]'s
//! `historyPrivate`/`historyGroup` once entries age out of the hot tier.

use sqlx::{PgPool, Row};

use crate::message::{Message, MessageKind};

fn row_to_message(row: sqlx::postgres::PgRow, kind: MessageKind) -> Message {
    Message {
        id: row.get("id"),
        from: row.get("from_user_id"),
        to: row.get(if matches!(kind, MessageKind::Private) {
            "to_user_id"
        } else {
            "group_id"
        }),
        kind,
        content: row.get("content"),
        timestamp: row.get("timestamp"),
        recalled: row.get("recalled"),
        recalled_at: row.get("recalled_at"),
        recalled_by: row.get("recalled_by"),
        read: false,
        read_timestamp: None,
    }
}

pub async fn update_recall_private(
    pool: &PgPool,
    message_id: &str,
    recalled_at: i64,
    recalled_by: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE private_messages SET recalled = TRUE, recalled_at = $2, recalled_by = $3 WHERE id = $1",
    )
    .bind(message_id)
    .bind(recalled_at)
    .bind(recalled_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_recall_group(
    pool: &PgPool,
    message_id: &str,
    recalled_at: i64,
    recalled_by: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE group_messages SET recalled = TRUE, recalled_at = $2, recalled_by = $3 WHERE id = $1",
    )
    .bind(message_id)
    .bind(recalled_at)
    .bind(recalled_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn history_private(
    pool: &PgPool,
    user_a: i64,
    user_b: i64,
    count: i64,
    offset: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    let (lo, hi) = crate::message::canonical_pair(user_a, user_b);
    let rows = sqlx::query(
        "SELECT id, from_user_id, to_user_id, content, timestamp, recalled, recalled_at, recalled_by \
         FROM private_messages \
         WHERE (from_user_id = $1 AND to_user_id = $2) OR (from_user_id = $2 AND to_user_id = $1) \
         ORDER BY timestamp DESC LIMIT $3 OFFSET $4",
    )
    .bind(lo)
    .bind(hi)
    .bind(count)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| row_to_message(r, MessageKind::Private))
        .collect())
}

/// Archives a batch of private messages for one conversation in a single
/// transaction, so the archive worker's per-key high-water mark only
/// advances once every message up to it is durably stored. Mirrors the
/// teacher's `replace_participants`/`replace_chips` idiom of a repo
/// function opening and owning its own transaction rather than accepting
/// a generic executor.
pub async fn archive_private_batch(pool: &PgPool, messages: &[Message]) -> Result<(), sqlx::Error> {
    if messages.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for msg in messages {
        sqlx::query(
            "INSERT INTO private_messages \
             (id, from_user_id, to_user_id, content, timestamp, recalled, recalled_at, recalled_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
             recalled = EXCLUDED.recalled, recalled_at = EXCLUDED.recalled_at, recalled_by = EXCLUDED.recalled_by",
        )
        .bind(&msg.id)
        .bind(msg.from)
        .bind(msg.to)
        .bind(&msg.content)
        .bind(msg.timestamp)
        .bind(msg.recalled)
        .bind(msg.recalled_at)
        .bind(msg.recalled_by)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

/// Same as [`archive_private_batch`] for a single group's stream.
pub async fn archive_group_batch(
    pool: &PgPool,
    group_id: i64,
    messages: &[Message],
) -> Result<(), sqlx::Error> {
    if messages.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for msg in messages {
        sqlx::query(
            "INSERT INTO group_messages \
             (id, group_id, from_user_id, content, timestamp, recalled, recalled_at, recalled_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
             recalled = EXCLUDED.recalled, recalled_at = EXCLUDED.recalled_at, recalled_by = EXCLUDED.recalled_by",
        )
        .bind(&msg.id)
        .bind(group_id)
        .bind(msg.from)
        .bind(&msg.content)
        .bind(msg.timestamp)
        .bind(msg.recalled)
        .bind(msg.recalled_at)
        .bind(msg.recalled_by)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

pub async fn history_group(
    pool: &PgPool,
    group_id: i64,
    count: i64,
    offset: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, from_user_id, group_id, content, timestamp, recalled, recalled_at, recalled_by \
         FROM group_messages WHERE group_id = $1 ORDER BY timestamp DESC LIMIT $2 OFFSET $3",
    )
    .bind(group_id)
    .bind(count)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| row_to_message(r, MessageKind::Group))
        .collect())
}
