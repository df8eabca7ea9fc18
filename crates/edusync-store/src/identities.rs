use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Persist the X25519 static secret for `user_id`, replacing any previous
    /// one.
    pub fn save_identity_secret(&self, user_id: &str, secret: &[u8; 32]) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO identity_keys (user_id, secret_hex, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, hex::encode(secret), chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_identity_secret(&self, user_id: &str) -> Result<Option<[u8; 32]>> {
        let secret_hex: Option<String> = self
            .conn()
            .query_row(
                "SELECT secret_hex FROM identity_keys WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(secret_hex) = secret_hex else {
            return Ok(None);
        };
        let bytes = hex::decode(secret_hex)?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidKey(user_id.to_string()))?;
        Ok(Some(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_secret_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("id.db"), None).unwrap();

        assert_eq!(db.load_identity_secret("T1").unwrap(), None);

        db.save_identity_secret("T1", &[9u8; 32]).unwrap();
        assert_eq!(db.load_identity_secret("T1").unwrap(), Some([9u8; 32]));

        db.save_identity_secret("T1", &[1u8; 32]).unwrap();
        assert_eq!(db.load_identity_secret("T1").unwrap(), Some([1u8; 32]));
    }

    #[test]
    fn truncated_secret_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("id.db"), None).unwrap();
        db.conn()
            .execute(
                "INSERT INTO identity_keys (user_id, secret_hex, created_at) VALUES ('T1', 'abcd', '')",
                [],
            )
            .unwrap();

        assert!(matches!(
            db.load_identity_secret("T1"),
            Err(StoreError::InvalidKey(id)) if id == "T1"
        ));
    }
}
