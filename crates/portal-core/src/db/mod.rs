// ============================================================================
// PortalDb - Persisted portal state (redb)
// ============================================================================
// Key-value storage for session markers, the last membership payload and
// the admin approval lists. Values are JSON text, read-modify-write on every
// mutation with no transaction spanning several keys.
// Default path: ~/.tribe-portal/portal.redb (override via PORTAL_DB_PATH)
// ============================================================================

mod memory;

pub use memory::MemoryStore;

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Documented keys of the persisted layout
pub mod keys {
    /// `"true"` while a wallet session should be silently restored
    pub const CONNECTED: &str = "connected";
    /// Lowercase address of the last connected wallet
    pub const ACCOUNT: &str = "account";
    /// Last fetched membership record (JSON)
    pub const MEMBERSHIP: &str = "membership";
    /// Approved admin-panel users (JSON array of addresses)
    pub const APPROVED_USERS: &str = "approved_users";
    /// Admin activity log (JSON array)
    pub const ADMIN_ACTIVITY: &str = "admin_activity";
}

const PORTAL: TableDefinition<&str, &str> = TableDefinition::new("portal");

/// Narrow key-value interface over the persisted portal state
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// All entries in key order
    fn entries(&self) -> Result<Vec<(String, String)>>;
}

/// JSON helpers available on every store
pub trait StoreExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| anyhow!("Failed to deserialize '{}': {}", key, e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| anyhow!("Failed to serialize '{}': {}", key, e))?;
        self.set(key, &raw)
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

/// Embedded database backing the portal's persisted state
pub struct PortalDb {
    db: Database,
    path: PathBuf,
}

impl PortalDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses PORTAL_DB_PATH env var or ~/.tribe-portal/portal.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("PORTAL_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let portal_dir = home.join(".tribe-portal");
            std::fs::create_dir_all(&portal_dir)
                .map_err(|e| anyhow!("Failed to create .tribe-portal directory: {}", e))?;
            portal_dir.join("portal.redb")
        };

        info!("Opening portal database at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(|e| anyhow!("Failed to open database: {}", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(PORTAL)
                .map_err(|e| anyhow!("Failed to create portal table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for PortalDb {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(PORTAL)
            .map_err(|e| anyhow!("Failed to open portal table: {}", e))?;

        let value = table
            .get(key)
            .map_err(|e| anyhow!("Failed to get '{}': {}", key, e))?
            .map(|v| v.value().to_string());
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(PORTAL)
                .map_err(|e| anyhow!("Failed to open portal table: {}", e))?;
            table
                .insert(key, value)
                .map_err(|e| anyhow!("Failed to insert '{}': {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored key: {}", key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(PORTAL)
                .map_err(|e| anyhow!("Failed to open portal table: {}", e))?;
            removed = table
                .remove(key)
                .map_err(|e| anyhow!("Failed to remove '{}': {}", key, e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Removed key: {}", key);
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(PORTAL)
            .map_err(|e| anyhow!("Failed to open portal table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate portal table: {}", e))?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push((key.value().to_string(), value.value().to_string()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (PortalDb, PathBuf) {
        let path = std::env::temp_dir().join(format!("portal-{}.redb", uuid::Uuid::new_v4()));
        let db = PortalDb::open(path.to_str()).unwrap();
        (db, path)
    }

    #[test]
    fn test_set_get_remove() {
        let (db, path) = temp_db();

        assert_eq!(db.get(keys::ACCOUNT).unwrap(), None);
        db.set(keys::ACCOUNT, "0xabc").unwrap();
        assert_eq!(db.get(keys::ACCOUNT).unwrap().as_deref(), Some("0xabc"));

        assert!(db.remove(keys::ACCOUNT).unwrap());
        assert!(!db.remove(keys::ACCOUNT).unwrap());
        assert_eq!(db.get(keys::ACCOUNT).unwrap(), None);

        drop(db);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_values_survive_reopen() {
        let (db, path) = temp_db();
        db.set_json(keys::APPROVED_USERS, &vec!["0x01", "0x02"]).unwrap();
        drop(db);

        let reopened = PortalDb::open(path.to_str()).unwrap();
        let users: Vec<String> = reopened.get_json(keys::APPROVED_USERS).unwrap().unwrap();
        assert_eq!(users, vec!["0x01", "0x02"]);

        let entries = reopened.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, keys::APPROVED_USERS);

        drop(reopened);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let (db, path) = temp_db();
        db.set(keys::MEMBERSHIP, "{not json").unwrap();
        let parsed: Result<Option<serde_json::Value>> = db.get_json(keys::MEMBERSHIP);
        assert!(parsed.is_err());

        drop(db);
        let _ = std::fs::remove_file(path);
    }
}
