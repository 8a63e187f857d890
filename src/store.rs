use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use tempfile::Builder;

use crate::domain::DatasetId;
use crate::error::SyncError;
use crate::normalize::rewrite_csv;

pub const LEDGER_FILE: &str = "download_metadata.csv";
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Output layout under the data directory:
/// `<root>/<id>/<id>_<timestamp>.csv` plus `<root>/download_metadata.csv`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ledger_path(&self) -> Utf8PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn dataset_dir(&self, id: &DatasetId) -> Utf8PathBuf {
        self.root.join(id.as_str())
    }

    pub fn artifact_path(&self, id: &DatasetId, started_at: NaiveDateTime) -> Utf8PathBuf {
        self.dataset_dir(id).join(format!(
            "{id}_{}.csv",
            started_at.format(ARTIFACT_TIMESTAMP_FORMAT)
        ))
    }

    pub fn ensure_root(&self) -> Result<(), SyncError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }

    /// Normalizes `payload` into `path` through a temp file in the same directory,
    /// so a failed rewrite leaves nothing behind.
    ///
    /// An existing file at `path` is replaced. Artifact names have one-second
    /// resolution, so when one identifier is downloaded twice within a second the
    /// later payload is kept. Downloads of one identifier run under its ledger
    /// lock, so that later payload is also the one the ledger records.
    pub fn write_csv_atomic(path: &Utf8Path, payload: &[u8]) -> Result<usize, SyncError> {
        let parent = path
            .parent()
            .ok_or_else(|| SyncError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("catalog-sync-csv")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let rows = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let rows = rewrite_csv(payload, &mut writer)?;
            writer
                .flush()
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
            rows
        };
        temp.persist(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        Ok(rows)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SyncError> {
        let parent = path
            .parent()
            .ok_or_else(|| SyncError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("catalog-sync-ledger")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Artifacts written for `id`, oldest first.
    pub fn list_artifacts(&self, id: &DatasetId) -> Result<Vec<Utf8PathBuf>, SyncError> {
        let dir = self.dataset_dir(id);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{id}_");
        let mut items = Vec::new();
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let is_artifact = path
                .file_name()
                .map(|name| name.starts_with(&prefix) && name.ends_with(".csv"))
                .unwrap_or(false);
            if is_artifact && path.as_std_path().is_file() {
                items.push(path);
            }
        }
        items.sort();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("data"));
        let id: DatasetId = "xubh-q36u".parse().unwrap();
        let started = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 1)
            .unwrap();

        assert_eq!(store.ledger_path(), Utf8PathBuf::from("data/download_metadata.csv"));
        assert_eq!(
            store.artifact_path(&id, started),
            Utf8PathBuf::from("data/xubh-q36u/xubh-q36u_2024-03-09_07-05-01.csv")
        );
    }

    #[test]
    fn failed_rewrite_leaves_no_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new(root);
        let id: DatasetId = "abcd-1234".parse().unwrap();
        let path = store.dataset_dir(&id).join("abcd-1234_x.csv");

        assert!(Store::write_csv_atomic(&path, b"").is_err());
        assert!(!path.as_std_path().exists());
        assert!(store.list_artifacts(&id).unwrap().is_empty());
    }
}
