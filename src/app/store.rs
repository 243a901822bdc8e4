use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::models::record::TaskRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid task file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One JSON document per task inside a directory tree.
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    dir: PathBuf,
}

impl JsonTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads every `*.json` file below the store directory, in path order.
    /// A missing directory holds no tasks.
    pub fn load_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        collect_json_files(&self.dir, &mut paths)?;
        paths.sort();

        let records = paths
            .iter()
            .map(|path| load_record(path))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Loaded {} task(s) from {:?}.", records.len(), self.dir);
        Ok(records)
    }

    /// Writes `task-<id>.json` through a temporary file, so an interrupted
    /// save never leaves a truncated record behind.
    pub fn save(&self, record: &TaskRecord) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!("task-{}.json", record.id));
        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::Io { path, source });
        }
        debug!("Task {} saved to {:?}.", record.id, path);
        Ok(path)
    }

    /// Replaces the previous contents of the store with `records`.
    ///
    /// Files of tasks that are gone are removed only after every record was
    /// written; on failure the old files stay in place.
    pub fn save_all(&self, records: &[TaskRecord]) -> Result<(), StoreError> {
        let written = records
            .iter()
            .map(|record| self.save(record))
            .collect::<Result<HashSet<_>, _>>()?;
        if !self.dir.exists() {
            return Ok(());
        }

        let mut stale = Vec::new();
        collect_json_files(&self.dir, &mut stale)?;
        for path in stale.into_iter().filter(|path| !written.contains(path)) {
            if let Err(err) = fs::remove_file(&path) {
                warn!("Failed to remove stale task file {:?}: {}", path, err);
            }
        }
        Ok(())
    }
}

fn load_record(path: &Path) -> Result<TaskRecord, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}
