use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8Path;
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{DatasetId, ModifiedDate};
use crate::error::SyncError;
use crate::store::Store;

pub const LEDGER_HEADER: [&str; 3] = [
    "landingPageCode",
    "last_modified_date",
    "last_downloaded_date",
];
pub const DOWNLOADED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "landingPageCode")]
    pub landing_page_code: String,
    pub last_modified_date: String,
    pub last_downloaded_date: String,
}

impl LedgerEntry {
    pub fn new(id: &DatasetId, modified: &ModifiedDate, downloaded_at: NaiveDateTime) -> Self {
        Self {
            landing_page_code: id.as_str().to_string(),
            last_modified_date: modified.as_str().to_string(),
            last_downloaded_date: downloaded_at.format(DOWNLOADED_AT_FORMAT).to_string(),
        }
    }

    pub fn modified(&self) -> ModifiedDate {
        ModifiedDate::new(self.last_modified_date.clone())
    }
}

/// Download proceeds when nothing is recorded yet or the record is strictly newer.
pub fn needs_download(stored: Option<&LedgerEntry>, modified: &ModifiedDate) -> bool {
    match stored {
        None => true,
        Some(entry) => modified.is_newer_than(&entry.modified()),
    }
}

type Slot = Arc<Mutex<Option<LedgerEntry>>>;

/// In-memory download ledger with one lock per identifier.
///
/// The index lock is only held to look up or create a slot; work on an entry
/// happens under that entry's own lock, so unrelated identifiers never wait on
/// each other. Entries are upserted, never removed.
#[derive(Debug, Default)]
pub struct Ledger {
    slots: Mutex<BTreeMap<DatasetId, Slot>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        let mut slots = BTreeMap::new();
        for entry in entries {
            let id = match entry.landing_page_code.parse::<DatasetId>() {
                Ok(id) => id,
                Err(_) => {
                    warn!(
                        code = %entry.landing_page_code,
                        "skipping ledger row with invalid identifier"
                    );
                    continue;
                }
            };
            if entry.modified().parsed().is_none() {
                warn!(
                    code = %entry.landing_page_code,
                    modified = %entry.last_modified_date,
                    "ledger date is not a recognized timestamp; comparing lexically"
                );
            }
            // Later rows win, matching the append-only history of older ledgers.
            slots.insert(id, Arc::new(Mutex::new(Some(entry))));
        }
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reads the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: &Utf8Path) -> Result<Self, SyncError> {
        if !path.as_std_path().exists() {
            return Ok(Self::new());
        }
        let file = File::open(path.as_std_path())
            .map_err(|err| SyncError::LedgerRead(format!("open {path}: {err}")))?;
        Ok(Self::from_entries(Self::parse(file)?))
    }

    /// Like [`Ledger::load`], but writes a header-only file when none exists yet.
    pub fn open(path: &Utf8Path) -> Result<Self, SyncError> {
        if path.as_std_path().exists() {
            return Self::load(path);
        }
        let ledger = Self::new();
        ledger.save(path)?;
        Ok(ledger)
    }

    pub fn parse<R: Read>(reader: R) -> Result<Vec<LedgerEntry>, SyncError> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        reader
            .deserialize::<LedgerEntry>()
            .map(|row| row.map_err(|err| SyncError::LedgerRead(err.to_string())))
            .collect()
    }

    pub fn get(&self, id: &DatasetId) -> Option<LedgerEntry> {
        let slot = self.lookup(id)?;
        lock(&slot).clone()
    }

    /// Runs `f` with exclusive access to the entry for `id`.
    ///
    /// The read, the decision and the upsert a caller performs inside `f` cannot
    /// interleave with another caller working on the same identifier.
    pub fn with_entry<F, R>(&self, id: &DatasetId, f: F) -> R
    where
        F: FnOnce(&mut Option<LedgerEntry>) -> R,
    {
        let slot = self.slot(id);
        let mut guard = lock(&slot);
        f(&mut guard)
    }

    pub fn upsert(&self, entry: LedgerEntry) -> Result<(), SyncError> {
        let id: DatasetId = entry.landing_page_code.parse()?;
        self.with_entry(&id, |slot| *slot = Some(entry));
        Ok(())
    }

    /// Recorded entries sorted by identifier.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter_map(|slot| lock(slot).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, SyncError> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::CRLF)
            .from_writer(Vec::new());
        writer
            .write_record(LEDGER_HEADER)
            .map_err(|err| SyncError::Csv(err.to_string()))?;
        for entry in self.entries() {
            writer
                .serialize(&entry)
                .map_err(|err| SyncError::Csv(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| SyncError::Csv(err.to_string()))
    }

    /// Serializes the whole ledger and replaces the file at `path` by rename.
    pub fn save(&self, path: &Utf8Path) -> Result<(), SyncError> {
        let content = self.to_csv()?;
        Store::write_bytes_atomic(path, &content)
    }

    fn lookup(&self, id: &DatasetId) -> Option<Slot> {
        lock(&self.slots).get(id).cloned()
    }

    fn slot(&self, id: &DatasetId) -> Slot {
        lock(&self.slots)
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
