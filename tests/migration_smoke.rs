//! Structural validation of the cold-storage migration: parses the SQL
//! file as text and checks required tables/columns/constraints are
//! present. Full migration execution is covered separately by the
//! `testcontainers`-backed integration tests in `chat_flow.rs`.

const MIGRATION_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/0001_init.sql");

fn read_migration() -> String {
    std::fs::read_to_string(MIGRATION_PATH).expect("migration file should exist")
}

#[test]
fn migration_file_exists_and_is_nonempty() {
    let sql = read_migration();
    assert!(!sql.trim().is_empty());
}

#[test]
fn all_five_tables_defined() {
    let sql = read_migration();
    for table in ["users", "user_friends", "groups", "private_messages", "group_messages"] {
        assert!(
            sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
            "migration must define {table} table"
        );
    }
}

#[test]
fn users_has_unique_username_and_email() {
    let sql = read_migration();
    assert!(sql.contains("username        TEXT NOT NULL UNIQUE"));
    assert!(sql.contains("email           TEXT NOT NULL UNIQUE"));
}

#[test]
fn users_avatar_defaults_to_empty_string() {
    let sql = read_migration();
    assert!(sql.contains("avatar          TEXT NOT NULL DEFAULT ''"));
}

#[test]
fn user_friends_has_canonical_pair_check() {
    let sql = read_migration();
    assert!(
        sql.contains("CHECK (user_id1 < user_id2)"),
        "user_friends must enforce canonical (smaller, larger) ordering"
    );
    assert!(sql.contains("PRIMARY KEY (user_id1, user_id2)"));
}

#[test]
fn groups_has_monotonic_id_and_creator_reference() {
    let sql = read_migration();
    let groups_start = sql.find("CREATE TABLE IF NOT EXISTS groups").unwrap();
    let groups_section = &sql[groups_start..];
    assert!(groups_section.contains("BIGSERIAL PRIMARY KEY"));
    assert!(groups_section.contains("creator_id BIGINT NOT NULL REFERENCES users(id)"));
}

#[test]
fn private_messages_has_pair_index() {
    let sql = read_migration();
    assert!(sql.contains(
        "CREATE INDEX IF NOT EXISTS idx_private_messages_pair\n    ON private_messages (from_user_id, to_user_id, timestamp DESC)"
    ));
}

#[test]
fn group_messages_has_group_index() {
    let sql = read_migration();
    assert!(sql.contains(
        "CREATE INDEX IF NOT EXISTS idx_group_messages_group\n    ON group_messages (group_id, timestamp DESC)"
    ));
}

#[test]
fn message_tables_track_recall_state() {
    let sql = read_migration();
    for table_marker in ["private_messages", "group_messages"] {
        let start = sql.find(&format!("CREATE TABLE IF NOT EXISTS {table_marker}")).unwrap();
        let section = &sql[start..];
        let end = section[1..].find("CREATE TABLE").map(|i| i + 1).unwrap_or(section.len());
        let block = &section[..end];
        assert!(block.contains("recalled      BOOLEAN NOT NULL DEFAULT FALSE")
            || block.contains("recalled     BOOLEAN NOT NULL DEFAULT FALSE"));
        assert!(block.contains("recalled_at"));
        assert!(block.contains("recalled_by"));
    }
}
