//! Durable key-value slots.
//!
//! A slot holds one serialized document (for example the whole validator
//! map). Writes carry a generation number and an older generation never
//! replaces a newer one, so write-through tasks may land in any order.

use super::connection::CacheDb;
use crate::Error;
use chrono::Utc;
use tokio_rusqlite::{params, rusqlite};

impl CacheDb {
    /// Read a slot's value.
    ///
    /// Returns None if the slot has never been written.
    pub async fn get_slot(&self, slot: &str) -> Result<Option<String>, Error> {
        let slot = slot.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let mut stmt = conn.prepare("SELECT value FROM kv_slots WHERE slot = ?1")?;

                match stmt.query_row(params![slot], |row| row.get(0)) {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Write a slot if `generation` is newer than the stored one.
    ///
    /// Returns whether the write was applied.
    pub async fn put_slot(&self, slot: &str, value: &str, generation: u64) -> Result<bool, Error> {
        let slot = slot.to_string();
        let value = value.to_string();
        let generation = generation as i64;
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "INSERT INTO kv_slots (slot, value, generation, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(slot) DO UPDATE SET
                        value = excluded.value,
                        generation = excluded.generation,
                        updated_at = excluded.updated_at
                    WHERE excluded.generation > kv_slots.generation",
                    params![slot, value, generation, updated_at],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_slot() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.put_slot("validators", r#"{"a":1}"#, 1).await.unwrap());

        let value = db.get_slot("validators").await.unwrap().unwrap();
        assert_eq!(value, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_get_missing_slot() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_slot("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_older_generation_is_ignored() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_slot("validators", "new", 5).await.unwrap();

        let applied = db.put_slot("validators", "old", 3).await.unwrap();
        assert!(!applied);
        assert_eq!(db.get_slot("validators").await.unwrap().unwrap(), "new");
    }

    #[tokio::test]
    async fn test_newer_generation_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_slot("validators", "first", 1).await.unwrap();
        db.put_slot("validators", "second", 2).await.unwrap();

        assert_eq!(db.get_slot("validators").await.unwrap().unwrap(), "second");
    }
}
