//! Cold-storage mirror of the hot-tier friendship sets. Friendship itself
//! lives in `HotStore` (see `MessagingCore`); this module is only reached
//! by the [`crate::archive::ArchiveWorker`]'s third pass, which relies on
//! the `(user_id1, user_id2)` uniqueness constraint for idempotence.

use sqlx::PgPool;

pub async fn insert_if_missing(
    pool: &PgPool,
    smaller: i64,
    larger: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO user_friends (user_id1, user_id2, status) VALUES ($1, $2, 'accepted') \
         ON CONFLICT (user_id1, user_id2) DO NOTHING",
    )
    .bind(smaller)
    .bind(larger)
    .execute(pool)
    .await?;
    Ok(())
}
