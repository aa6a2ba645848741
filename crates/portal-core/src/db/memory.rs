// ============================================================================
// In-memory store for tests and throwaway sessions
// ============================================================================

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::KeyValueStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("Memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(entries.remove(key).is_some())
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        let entries = self.entries.read().map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
