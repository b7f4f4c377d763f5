//! On-disk caches: the raw snapshot (MessagePack) and per-key tables (CSV).

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::error::HistoryError;
use crate::types::{NormalizedRecord, PersistedTable, RawSnapshot, COLUMNS};

pub const SNAPSHOT_FILE: &str = "option_orders_cache.msgpack";

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    snapshot_file: String,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            snapshot_file: SNAPSHOT_FILE.to_string(),
        }
    }

    pub fn with_snapshot_file(mut self, name: impl Into<String>) -> Self {
        self.snapshot_file = name.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot_file)
    }

    /// Cache keys are plain file names inside the cache directory.
    pub fn table_path(&self, key: &str) -> Result<PathBuf, HistoryError> {
        let bad = key.trim().is_empty()
            || key == "."
            || key == ".."
            || key.contains(['/', '\\'])
            || key == self.snapshot_file;
        if bad {
            return Err(HistoryError::InvalidCacheKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    // ---------- Raw snapshot ----------

    pub fn load_snapshot(&self) -> Result<Option<RawSnapshot>, HistoryError> {
        let path = self.snapshot_path();
        if !path.exists() {
            info!(path = %path.display(), "No cached orders found.");
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| HistoryError::corrupt(&path, e))?;
        let snapshot: RawSnapshot =
            rmp_serde::from_slice(&bytes).map_err(|e| HistoryError::corrupt(&path, e))?;
        info!(
            path = %path.display(),
            orders = snapshot.orders.len(),
            fetched_at = %snapshot.fetched_at,
            "Loaded cached orders."
        );
        Ok(Some(snapshot))
    }

    pub fn save_snapshot(&self, snapshot: &RawSnapshot) -> Result<(), HistoryError> {
        let path = self.snapshot_path();
        let bytes = rmp_serde::to_vec_named(snapshot).map_err(|e| HistoryError::write(&path, e))?;
        write_replace(&path, |tmp| fs::write(tmp, &bytes).map_err(|e| e.to_string()))?;
        info!(path = %path.display(), orders = snapshot.orders.len(), "Saved order snapshot.");
        Ok(())
    }

    pub fn invalidate_snapshot(&self) -> Result<(), HistoryError> {
        remove_if_present(&self.snapshot_path())
    }

    // ---------- Tables ----------

    pub fn load_table(&self, key: &str) -> Result<PersistedTable, HistoryError> {
        let path = self.table_path(key)?;
        if !path.exists() {
            info!(path = %path.display(), "No table found.");
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| HistoryError::corrupt(&path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| HistoryError::corrupt(&path, e))?
            .clone();
        if !headers.iter().eq(COLUMNS.iter().copied()) {
            return Err(HistoryError::corrupt(
                &path,
                format!("unexpected header {:?}", headers.iter().collect::<Vec<_>>()),
            ));
        }

        let mut table = Vec::new();
        for (row, rec) in reader.deserialize::<NormalizedRecord>().enumerate() {
            let rec = rec.map_err(|e| HistoryError::corrupt(&path, format!("row {}: {}", row + 1, e)))?;
            table.push(rec);
        }
        info!(path = %path.display(), rows = table.len(), "Loaded table.");
        Ok(table)
    }

    /// Rewrites the whole table for `key`.
    pub fn save_table(&self, key: &str, table: &[NormalizedRecord]) -> Result<(), HistoryError> {
        let path = self.table_path(key)?;
        write_replace(&path, |tmp| {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(tmp)
                .map_err(|e| e.to_string())?;
            writer.write_record(COLUMNS).map_err(|e| e.to_string())?;
            for rec in table {
                writer.serialize(rec).map_err(|e| e.to_string())?;
            }
            writer.flush().map_err(|e| e.to_string())
        })?;
        info!(path = %path.display(), rows = table.len(), "Saved table.");
        Ok(())
    }

    pub fn invalidate(&self, key: &str) -> Result<(), HistoryError> {
        remove_if_present(&self.table_path(key)?)
    }
}

/// Write via a sibling temp file, then rename over `path`.
fn write_replace(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<(), String>,
) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HistoryError::write(path, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    if let Err(reason) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(HistoryError::write(path, reason));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        HistoryError::write(path, e)
    })
}

fn remove_if_present(path: &Path) -> Result<(), HistoryError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed cache file.");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HistoryError::write(path, e)),
    }
}
