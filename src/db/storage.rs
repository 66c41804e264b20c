//! Client-local persistent storage, as an injectable capability.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::repos::core::settings;
use super::DbPool;
use crate::error::AppError;

/// String values stored under fixed keys.
pub trait KvStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    /// Atomic read-modify-write of `key`. `f` gets the current value and
    /// returns the replacement, or `None` to leave it as is. No other update
    /// of the same storage interleaves between the read and the write.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, AppError>,
    ) -> Result<(), AppError>;
}

/// `app_settings`-backed storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl KvStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        settings::get(&self.pool, key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        settings::set(&self.pool, key, value)
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, AppError>,
    ) -> Result<(), AppError> {
        settings::update(&self.pool, key, f)
    }
}

/// Process-local storage for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStorage {
    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("memory storage lock poisoned".into()))
    }
}

impl KvStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> Result<Option<String>, AppError>,
    ) -> Result<(), AppError> {
        let mut entries = self.entries()?;
        if let Some(next) = f(entries.get(key).cloned())? {
            entries.insert(key.to_string(), next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    fn exercise(storage: &dyn KvStorage) {
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v1").unwrap();
        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v2".into()));

        storage
            .update("k", &mut |cur| Ok(cur.map(|v| format!("{v}+"))))
            .unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v2+".into()));
        storage.update("absent", &mut |_| Ok(None)).unwrap();
        assert_eq!(storage.get("absent").unwrap(), None);
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sqlite_storage() {
        exercise(&SqliteStorage::new(init_test_db().unwrap()));
    }
}
