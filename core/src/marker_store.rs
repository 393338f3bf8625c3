/// Notified-marker storage: one sled key per (conversation, last message time)
/// that already raised a desktop notification. Markers are never rewritten;
/// a newer message simply gets its own key.
use crate::error::{LinkError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

pub struct MarkerStore {
    db: sled::Db,
}

impl MarkerStore {
    /// Open (or create) the store under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = sled::open(data_dir.join("notified.db"))
            .map_err(|e| LinkError::Storage(format!("Failed to open marker DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Store that disappears with the process
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| LinkError::Storage(format!("Failed to open marker DB: {}", e)))?;
        Ok(Self { db })
    }

    fn key(conversation_id: i64, at: DateTime<Utc>) -> String {
        format!("notified:{}:{}", conversation_id, at.timestamp_millis())
    }

    pub fn contains(&self, conversation_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.db
            .contains_key(Self::key(conversation_id, at).as_bytes())
            .map_err(|e| LinkError::Storage(format!("contains marker: {}", e)))
    }

    /// Write the marker if absent. Returns `true` only for the caller that wrote it.
    pub fn insert(&self, conversation_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let key = Self::key(conversation_id, at);
        let value = Utc::now().to_rfc3339().into_bytes();
        let swapped = self
            .db
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))
            .map_err(|e| LinkError::Storage(format!("insert marker: {}", e)))?;
        if swapped.is_err() {
            return Ok(false);
        }
        self.db
            .flush()
            .map_err(|e| LinkError::Storage(format!("flush markers: {}", e)))?;
        Ok(true)
    }
}

impl Clone for MarkerStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
