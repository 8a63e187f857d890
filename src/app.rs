use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::Local;
use crossbeam_channel::{bounded, unbounded};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::DistributionClient;
use crate::domain::DatasetId;
use crate::error::SyncError;
use crate::ledger::{Ledger, LedgerEntry, needs_download};
use crate::manifest::{DatasetRecord, ManifestLoader, filter_by_theme};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub workers: usize,
    pub force: bool,
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WORKERS,
            force: false,
            dry_run: false,
        }
    }
}

/// What happened to one manifest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Downloaded {
        id: String,
        modified: String,
        path: String,
        rows: usize,
    },
    Skipped {
        id: String,
        modified: String,
    },
    WouldDownload {
        id: String,
        modified: String,
        url: String,
    },
    Failed {
        id: Option<String>,
        url: Option<String>,
        reason: String,
    },
}

impl RecordOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            RecordOutcome::Downloaded { id, .. }
            | RecordOutcome::Skipped { id, .. }
            | RecordOutcome::WouldDownload { id, .. } => Some(id),
            RecordOutcome::Failed { id, .. } => id.as_deref(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RecordOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub theme: String,
    pub total_records: usize,
    pub matched: usize,
    pub downloaded: usize,
    /// Records a dry run would have downloaded.
    pub would_download: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub items: Vec<RecordOutcome>,
}

impl SyncResult {
    fn from_outcomes(
        theme: &str,
        total_records: usize,
        dry_run: bool,
        items: Vec<RecordOutcome>,
    ) -> Self {
        let downloaded = items
            .iter()
            .filter(|item| matches!(item, RecordOutcome::Downloaded { .. }))
            .count();
        let would_download = items
            .iter()
            .filter(|item| matches!(item, RecordOutcome::WouldDownload { .. }))
            .count();
        let skipped = items
            .iter()
            .filter(|item| matches!(item, RecordOutcome::Skipped { .. }))
            .count();
        let failed = items.iter().filter(|item| item.is_failure()).count();
        Self {
            theme: theme.to_string(),
            total_records,
            matched: items.len(),
            downloaded,
            would_download,
            skipped,
            failed,
            dry_run,
            items,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.items.iter().filter(|item| item.is_failure())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerResult {
    pub path: String,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub id: String,
    pub last_modified_date: Option<String>,
    pub last_downloaded_date: Option<String>,
    pub latest_artifact: Option<String>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives console-level progress lines. Called from worker threads.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<C: DistributionClient> {
    store: Store,
    client: C,
}

impl<C: DistributionClient> App<C> {
    pub fn new(store: Store, client: C) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Loads the manifest, syncs every record carrying `theme` and persists the ledger.
    pub fn run(
        &self,
        manifest: &Utf8Path,
        theme: &str,
        options: &SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SyncResult, SyncError> {
        let records = ManifestLoader::load(manifest)?;
        let total = records.len();
        let matching = filter_by_theme(records, theme);
        info!(%manifest, total, matched = matching.len(), theme, "manifest loaded");
        sink.event(ProgressEvent {
            message: format!(
                "{} of {total} datasets match theme {theme:?}",
                matching.len()
            ),
            elapsed: None,
        });

        let ledger_path = self.store.ledger_path();
        let ledger = if options.dry_run {
            Ledger::load(&ledger_path)?
        } else {
            self.store.ensure_root()?;
            Ledger::open(&ledger_path)?
        };

        let start = Instant::now();
        let result = self.sync(theme, total, &matching, &ledger, options, sink);

        if !options.dry_run {
            ledger.save(&ledger_path)?;
        }
        info!(
            downloaded = result.downloaded,
            would_download = result.would_download,
            skipped = result.skipped,
            failed = result.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sync finished"
        );
        Ok(result)
    }

    /// Processes `records` on a bounded pool of `options.workers` threads.
    ///
    /// Outcomes come back in input order whatever order the workers finish in.
    pub fn sync(
        &self,
        theme: &str,
        total_records: usize,
        records: &[DatasetRecord],
        ledger: &Ledger,
        options: &SyncOptions,
        sink: &dyn ProgressSink,
    ) -> SyncResult {
        let workers = options.workers.max(1).min(records.len().max(1));
        debug!(workers, records = records.len(), "starting workers");

        let (job_tx, job_rx) = bounded::<(usize, &DatasetRecord)>(workers * 2);
        let (done_tx, done_rx) = unbounded::<(usize, RecordOutcome)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (index, record) in job_rx {
                        let outcome = self.process_record(record, ledger, options, sink);
                        if done_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            for job in records.iter().enumerate() {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let mut slots: Vec<Option<RecordOutcome>> = vec![None; records.len()];
        for (index, outcome) in done_rx {
            slots[index] = Some(outcome);
        }
        let items = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| RecordOutcome::Failed {
                    id: None,
                    url: None,
                    reason: "worker exited before processing record".to_string(),
                })
            })
            .collect();

        SyncResult::from_outcomes(theme, total_records, options.dry_run, items)
    }

    /// Decides, downloads, rewrites and records a single dataset.
    ///
    /// The ledger entry for the record's identifier stays locked for the whole
    /// sequence. Errors are reported and returned as `Failed`, never raised.
    pub fn process_record(
        &self,
        record: &DatasetRecord,
        ledger: &Ledger,
        options: &SyncOptions,
        sink: &dyn ProgressSink,
    ) -> RecordOutcome {
        let id = match record.identifier() {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "skipping record without usable identifier");
                sink.event(ProgressEvent {
                    message: format!("Skipping record: {err}"),
                    elapsed: None,
                });
                return RecordOutcome::Failed {
                    id: None,
                    url: record.download_url().map(str::to_string),
                    reason: err.to_string(),
                };
            }
        };
        let modified = record.modified();

        ledger.with_entry(&id, |entry| {
            if !options.force && !needs_download(entry.as_ref(), &modified) {
                debug!(%id, %modified, "ledger is current");
                sink.event(ProgressEvent {
                    message: format!("No new data for code: {id}"),
                    elapsed: None,
                });
                return RecordOutcome::Skipped {
                    id: id.to_string(),
                    modified: modified.to_string(),
                };
            }

            let Some(url) = record.download_url() else {
                let err = SyncError::MissingDistribution(id.to_string());
                warn!(%id, error = %err, "cannot download");
                sink.event(ProgressEvent {
                    message: format!("An error occurred while processing {id}: {err}"),
                    elapsed: None,
                });
                return RecordOutcome::Failed {
                    id: Some(id.to_string()),
                    url: None,
                    reason: err.to_string(),
                };
            };

            if options.dry_run {
                sink.event(ProgressEvent {
                    message: format!("Would download {url} for code: {id}"),
                    elapsed: None,
                });
                return RecordOutcome::WouldDownload {
                    id: id.to_string(),
                    modified: modified.to_string(),
                    url: url.to_string(),
                };
            }

            let started_at = Local::now().naive_local();
            let path = self.store.artifact_path(&id, started_at);
            let start = Instant::now();
            match self.download_to(&id, url, &path) {
                Ok(rows) => {
                    *entry = Some(LedgerEntry::new(
                        &id,
                        &modified,
                        Local::now().naive_local(),
                    ));
                    let elapsed = start.elapsed();
                    info!(
                        %id,
                        %path,
                        rows,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "downloaded"
                    );
                    sink.event(ProgressEvent {
                        message: format!("Downloaded and saved data to {path}"),
                        elapsed: Some(elapsed),
                    });
                    RecordOutcome::Downloaded {
                        id: id.to_string(),
                        modified: modified.to_string(),
                        path: path.to_string(),
                        rows,
                    }
                }
                Err(err) => {
                    warn!(%id, %url, error = %err, "download failed");
                    let message = match err {
                        SyncError::Http(_) | SyncError::HttpStatus { .. } => {
                            format!("Error downloading data from {url}: {err}")
                        }
                        _ => format!("An error occurred while processing {path}: {err}"),
                    };
                    sink.event(ProgressEvent {
                        message,
                        elapsed: Some(start.elapsed()),
                    });
                    RecordOutcome::Failed {
                        id: Some(id.to_string()),
                        url: Some(url.to_string()),
                        reason: err.to_string(),
                    }
                }
            }
        })
    }

    pub fn ledger(&self) -> Result<LedgerResult, SyncError> {
        let path = self.store.ledger_path();
        let ledger = Ledger::load(&path)?;
        Ok(LedgerResult {
            path: path.to_string(),
            entries: ledger.entries(),
        })
    }

    pub fn info(&self, id: &DatasetId) -> Result<InfoResult, SyncError> {
        let ledger = Ledger::load(&self.store.ledger_path())?;
        let entry = ledger.get(id);
        let artifacts = self.store.list_artifacts(id)?;
        if entry.is_none() && artifacts.is_empty() {
            return Err(SyncError::DatasetNotFound(id.to_string()));
        }

        Ok(InfoResult {
            id: id.to_string(),
            last_modified_date: entry.as_ref().map(|e| e.last_modified_date.clone()),
            last_downloaded_date: entry.map(|e| e.last_downloaded_date),
            latest_artifact: artifacts.last().map(|path| path.to_string()),
            artifacts: artifacts.iter().map(|path| path.to_string()).collect(),
        })
    }

    fn download_to(
        &self,
        id: &DatasetId,
        url: &str,
        path: &Utf8Path,
    ) -> Result<usize, SyncError> {
        debug!(%id, %url, "requesting distribution");
        let payload = self.client.download(url)?;
        Store::write_csv_atomic(path, &payload)
    }
}
