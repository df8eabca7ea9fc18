use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS identity_keys (
    user_id    TEXT PRIMARY KEY NOT NULL,
    secret_hex TEXT NOT NULL,               -- hex-encoded 32-byte X25519 secret
    created_at TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
