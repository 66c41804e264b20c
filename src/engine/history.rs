//! Bounded, most-recent-first log of completed runs.
//!
//! The whole history is one JSON array stored under [`settings_keys::TEST_HISTORY`].
//! Every write is a single [`KvStorage::update`], so appends from several
//! stores (threads or processes sharing one database) serialize at the storage
//! layer and none is lost. Callers always receive owned snapshots.

use std::sync::Arc;

use serde_json::Value;

use super::export;
use super::types::TestRun;
use crate::db::settings_keys;
use crate::db::storage::KvStorage;
use crate::error::AppError;

/// Maximum number of runs retained. Older runs fall off the end (FIFO by creation).
pub const HISTORY_CAPACITY: usize = 50;

pub struct HistoryStore {
    storage: Arc<dyn KvStorage>,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn KvStorage>) -> Self {
        Self { storage }
    }

    /// Create the empty persisted array if nothing is stored yet.
    pub fn init(&self) -> Result<(), AppError> {
        self.storage.update(settings_keys::TEST_HISTORY, &mut |current| {
            if current.is_some() {
                return Ok(None);
            }
            tracing::debug!("Initialized empty test history");
            Ok(Some("[]".to_string()))
        })
    }

    /// Prepend `run`, evicting the oldest entries beyond [`HISTORY_CAPACITY`].
    pub fn append(&self, run: TestRun) -> Result<(), AppError> {
        let mut len = 0;
        let mut evicted = 0;

        self.storage.update(settings_keys::TEST_HISTORY, &mut |current| {
            let mut runs = decode(current.as_deref());
            runs.insert(0, run.clone());
            evicted = runs.len().saturating_sub(HISTORY_CAPACITY);
            runs.truncate(HISTORY_CAPACITY);
            len = runs.len();
            Ok(Some(serde_json::to_string(&runs)?))
        })?;

        tracing::debug!(test_id = %run.test_id, len, evicted, "Appended run to history");
        Ok(())
    }

    /// Most-recent-first snapshot, optionally truncated to `limit` entries.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<TestRun>, AppError> {
        let raw = self.storage.get(settings_keys::TEST_HISTORY)?;
        let mut runs = decode(raw.as_deref());
        if let Some(limit) = limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    pub fn latest(&self) -> Result<Option<TestRun>, AppError> {
        self.at(0)
    }

    /// Run at `index` in most-recent-first order (0 is the latest).
    pub fn at(&self, index: usize) -> Result<Option<TestRun>, AppError> {
        Ok(self.list(Some(index.saturating_add(1)))?.into_iter().nth(index))
    }

    /// Most recent run carrying `test_id`.
    ///
    /// Ids are not guaranteed unique: the backend derives them from whole
    /// seconds, so runs finishing within the same second share one. Older runs
    /// with a duplicated id are only reachable through [`HistoryStore::at`].
    pub fn get(&self, test_id: &str) -> Result<Option<TestRun>, AppError> {
        Ok(self.list(None)?.into_iter().find(|r| r.test_id == test_id))
    }

    /// Serialize a stored run for external consumption.
    pub fn export_run(&self, test_id: &str) -> Result<Vec<u8>, AppError> {
        let run = self
            .get(test_id)?
            .ok_or_else(|| AppError::NotFound(format!("TestRun {test_id}")))?;
        export::export_run(&run)
    }
}

/// Decode the stored array. Anything unreadable counts as empty.
fn decode(raw: Option<&str>) -> Vec<TestRun> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let entries: Vec<Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Stored test history is unreadable, treating as empty: {}", e);
            return Vec::new();
        }
    };

    let total = entries.len();
    let runs: Vec<TestRun> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if runs.len() != total {
        tracing::warn!(skipped = total - runs.len(), "Skipped malformed test history entries");
    }
    runs
}
