use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::{AppError, Context, Result};
use crate::fetch::Candle;

pub mod dataset;

pub use dataset::{read_candles, signature, write_candles, DatasetMetadata};

/// Directory of persisted candle series, one metadata JSON and one rows CSV per signature.
pub struct Store {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Store {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self, signature: &str) -> bool {
        self.metadata_path(signature).is_file()
    }

    /// Register an empty dataset.
    pub fn create(&self, signature: &str, metadata: &DatasetMetadata) -> Result<()> {
        let lock = self.lock_for(signature)?;
        let _guard = lock
            .lock()
            .map_err(|_| AppError::message(format!("dataset {signature} lock poisoned")))?;

        if self.exists(signature) {
            return Err(AppError::DuplicateDataset(signature.to_string()));
        }
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create dataset directory {}", self.root.display())
        })?;

        let mut metadata = metadata.clone();
        metadata.signature = signature.to_string();
        metadata.last_timestamp = None;
        write_candles(self.rows_path(signature), &[])?;
        self.write_metadata(&self.metadata_path(signature), &metadata)?;
        debug!(
            "created dataset {} for {} {}",
            signature, metadata.market, metadata.timeframe
        );
        Ok(())
    }

    pub fn metadata(&self, signature: &str) -> Result<DatasetMetadata> {
        let path = self.metadata_path(signature);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::DatasetNotFound(signature.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse dataset metadata {}", path.display()))?;
        Ok(metadata)
    }

    /// Every persisted row, ordered by timestamp.
    pub fn read_all(&self, signature: &str) -> Result<Vec<Candle>> {
        if !self.exists(signature) {
            return Err(AppError::DatasetNotFound(signature.to_string()));
        }
        let mut rows = read_candles(self.rows_path(signature))?;
        rows.sort_by_key(|candle| candle.timestamp);
        Ok(rows)
    }

    /// Persist new rows. An empty dataset takes every row; otherwise only rows newer than
    /// `after` are appended. Returns the number of rows written.
    ///
    /// Rows and metadata are swapped in together: if the metadata cannot be replaced the previous
    /// rows file is put back.
    pub fn merge_newer(&self, signature: &str, rows: &[Candle], after: Option<i64>) -> Result<usize> {
        let lock = self.lock_for(signature)?;
        let _guard = lock
            .lock()
            .map_err(|_| AppError::message(format!("dataset {signature} lock poisoned")))?;

        self.merge_locked(signature, rows, after)
    }

    /// Create the dataset holding `rows`, or append the newer ones if it already exists.
    ///
    /// Rows are on disk before the metadata appears, so a concurrent reader never sees the new
    /// dataset empty.
    pub fn create_or_merge(
        &self,
        signature: &str,
        metadata: &DatasetMetadata,
        rows: &[Candle],
    ) -> Result<usize> {
        let lock = self.lock_for(signature)?;
        let _guard = lock
            .lock()
            .map_err(|_| AppError::message(format!("dataset {signature} lock poisoned")))?;

        if self.exists(signature) {
            let after = self.metadata(signature)?.last_timestamp;
            debug!("dataset {signature} already exists, merging");
            return self.merge_locked(signature, rows, after);
        }
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create dataset directory {}", self.root.display())
        })?;

        let mut series = rows.to_vec();
        series.sort_by_key(|candle| candle.timestamp);
        series.dedup_by_key(|candle| candle.timestamp);

        let mut metadata = metadata.clone();
        metadata.signature = signature.to_string();
        metadata.last_timestamp = series.last().map(|candle| candle.timestamp);

        write_candles(self.rows_path(signature), &series)?;
        let meta_tmp = self.root.join(format!("{signature}.json.tmp"));
        self.write_metadata(&meta_tmp, &metadata)?;
        fs::rename(&meta_tmp, self.metadata_path(signature))?;
        debug!(
            "created dataset {} for {} {} with {} rows",
            signature,
            metadata.market,
            metadata.timeframe,
            series.len()
        );
        Ok(series.len())
    }

    fn merge_locked(&self, signature: &str, rows: &[Candle], after: Option<i64>) -> Result<usize> {
        let mut metadata = self.metadata(signature)?;
        let mut persisted = self.read_all(signature)?;

        // never append at or before what is already stored
        let floor = match (persisted.last(), after) {
            (None, _) => None,
            (Some(last), Some(after)) => Some(after.max(last.timestamp)),
            (Some(last), None) => Some(last.timestamp),
        };

        let mut fresh: Vec<Candle> = rows
            .iter()
            .filter(|candle| floor.map_or(true, |floor| candle.timestamp > floor))
            .copied()
            .collect();
        fresh.sort_by_key(|candle| candle.timestamp);
        fresh.dedup_by_key(|candle| candle.timestamp);

        if fresh.is_empty() {
            debug!("dataset {signature}: nothing newer to store");
            return Ok(0);
        }

        let inserted = fresh.len();
        persisted.extend(fresh);
        metadata.last_timestamp = persisted.last().map(|candle| candle.timestamp);

        self.swap_in(signature, &persisted, &metadata)?;
        debug!("dataset {signature}: stored {inserted} new rows");
        Ok(inserted)
    }

    pub fn delete(&self, signature: &str) -> Result<()> {
        let lock = self.lock_for(signature)?;
        let _guard = lock
            .lock()
            .map_err(|_| AppError::message(format!("dataset {signature} lock poisoned")))?;

        if !self.exists(signature) {
            return Err(AppError::DatasetNotFound(signature.to_string()));
        }
        fs::remove_file(self.metadata_path(signature))?;
        match fs::remove_file(self.rows_path(signature)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Metadata of every dataset under the root, sorted by market then timeframe.
    pub fn list(&self) -> Result<Vec<DatasetMetadata>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::message(format!(
                    "Failed to list dataset directory {}: {}",
                    self.root.display(),
                    err
                )))
            }
        };

        let mut datasets = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(signature) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.metadata(signature) {
                Ok(metadata) => datasets.push(metadata),
                Err(err) => warn!("skipping unreadable dataset {}: {}", path.display(), err),
            }
        }

        datasets.sort_by(|a, b| {
            a.market
                .cmp(&b.market)
                .then_with(|| a.timeframe.cmp(&b.timeframe))
        });
        Ok(datasets)
    }

    fn swap_in(&self, signature: &str, rows: &[Candle], metadata: &DatasetMetadata) -> Result<()> {
        let rows_path = self.rows_path(signature);
        let meta_path = self.metadata_path(signature);
        let rows_tmp = self.root.join(format!("{signature}.csv.tmp"));
        let meta_tmp = self.root.join(format!("{signature}.json.tmp"));
        let rows_backup = self.root.join(format!("{signature}.csv.bak"));

        write_candles(&rows_tmp, rows)?;
        self.write_metadata(&meta_tmp, metadata)?;

        // rows_path stays readable throughout, each rename replaces it in one step
        fs::copy(&rows_path, &rows_backup)
            .with_context(|| format!("Failed to back up {}", rows_path.display()))?;
        if let Err(err) = fs::rename(&rows_tmp, &rows_path) {
            let _ = fs::remove_file(&rows_backup);
            let _ = fs::remove_file(&rows_tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&meta_tmp, &meta_path) {
            warn!("dataset {signature}: metadata update failed, restoring previous rows");
            let _ = fs::rename(&rows_backup, &rows_path);
            let _ = fs::remove_file(&meta_tmp);
            return Err(err.into());
        }

        let _ = fs::remove_file(&rows_backup);
        Ok(())
    }

    fn write_metadata(&self, path: &Path, metadata: &DatasetMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write dataset metadata {}", path.display()))?;
        Ok(())
    }

    fn lock_for(&self, signature: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| AppError::message("dataset lock table poisoned"))?;
        Ok(Arc::clone(
            locks
                .entry(signature.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    fn metadata_path(&self, signature: &str) -> PathBuf {
        self.root.join(format!("{signature}.json"))
    }

    fn rows_path(&self, signature: &str) -> PathBuf {
        self.root.join(format!("{signature}.csv"))
    }
}
