//! Bounded, deduplicated history of past generations.
//!
//! The list lives in [`Storage`] under [`HISTORY_KEY`], most recent first.
//! Two entries with the same `(content, templateId)` pair are the same
//! artifact: the first one stored wins and later duplicates are dropped
//! without touching the existing entry or its position. After any insertion
//! the tail is trimmed back to the configured capacity.
//!
//! Every mutation is a load → modify → save cycle under one lock, so no
//! partially applied change is ever observable.

use crate::config::{ImageFormat, StyleSnapshot};
use crate::error::ShareImageError;
use crate::naming;
use crate::notify::{Event, SharedNotifier};
use crate::storage::Storage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Storage key of the history list.
pub const HISTORY_KEY: &str = "history";

/// Version written into history exports.
pub const EXPORT_VERSION: &str = "1.0.0";

/// Facts about the encoded image an entry was created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMeta {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub content: String,
    pub template_id: String,
    pub style: StyleSnapshot,
    /// JPEG data URL; empty when no thumbnail could be made.
    #[serde(default)]
    pub thumbnail: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub filename: String,
    pub output_meta: OutputMeta,
}

impl HistoryEntry {
    /// A new entry with a fresh id, stamped now.
    pub fn new(
        content: impl Into<String>,
        template_id: impl Into<String>,
        style: StyleSnapshot,
        thumbnail: String,
        filename: impl Into<String>,
        output_meta: OutputMeta,
    ) -> Self {
        Self {
            id: format!("img_{}", Uuid::new_v4().simple()),
            content: content.into(),
            template_id: template_id.into(),
            style,
            thumbnail,
            created_at: Utc::now(),
            filename: filename.into(),
            output_meta,
        }
    }

    /// Dedup identity.
    pub fn identity(&self) -> (&str, &str) {
        (&self.content, &self.template_id)
    }

    fn matches(&self, needle: &str) -> bool {
        self.content.to_lowercase().contains(needle)
            || self.template_id.to_lowercase().contains(needle)
            || self.filename.to_lowercase().contains(needle)
    }
}

/// Exported/imported history document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryExport {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub data: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted { id: String },
    /// An entry with the same identity already exists; nothing changed.
    Duplicate { existing_id: String },
}

/// What the presentation layer needs to reopen an entry for editing.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredState {
    pub content: String,
    pub template_id: String,
    pub style: StyleSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    pub by_template: BTreeMap<String, usize>,
    pub by_format: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Keep the first entry per identity, in order, then cut to `capacity`.
/// Returns how many of the first `head` entries survived.
fn dedup_and_trim(entries: &mut Vec<HistoryEntry>, capacity: usize, head: usize) -> usize {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut kept_head = 0;
    let mut index = 0;
    entries.retain(|e| {
        let keep = seen.insert((e.content.clone(), e.template_id.clone()));
        if keep && index < head && seen.len() <= capacity {
            kept_head += 1;
        }
        index += 1;
        keep
    });
    entries.truncate(capacity);
    kept_head
}

/// Persistent history of generations.
pub struct HistoryStore {
    storage: Storage,
    capacity: usize,
    notifier: SharedNotifier,
    write: Mutex<()>,
}

impl HistoryStore {
    pub fn new(storage: Storage, capacity: usize, notifier: SharedNotifier) -> Self {
        Self {
            storage,
            capacity: capacity.max(1),
            notifier,
            write: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self) -> Result<Vec<HistoryEntry>, ShareImageError> {
        Ok(self
            .storage
            .get_json::<Vec<HistoryEntry>>(HISTORY_KEY)?
            .unwrap_or_default())
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), ShareImageError> {
        self.storage.set_json(HISTORY_KEY, &entries, None)?;
        Ok(())
    }

    /// Insert `entry` at the head unless its identity is already stored.
    pub fn add(&self, entry: HistoryEntry) -> Result<AddOutcome, ShareImageError> {
        let _guard = self.guard();
        let mut entries = self.load()?;

        if let Some(existing) = entries.iter().find(|e| e.identity() == entry.identity()) {
            info!(
                "History already holds this content/template (entry {}), skipping",
                existing.id
            );
            return Ok(AddOutcome::Duplicate {
                existing_id: existing.id.clone(),
            });
        }

        let id = entry.id.clone();
        entries.insert(0, entry);
        if entries.len() > self.capacity {
            debug!("History over capacity, trimming {} entries", entries.len() - self.capacity);
            entries.truncate(self.capacity);
        }
        self.save(&entries)?;
        self.notifier.notify(&Event::HistoryAdded { id: id.clone() });
        Ok(AddOutcome::Inserted { id })
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>, ShareImageError> {
        Ok(self.load()?.into_iter().find(|e| e.id == id))
    }

    /// All entries, most recent first.
    pub fn list(&self) -> Result<Vec<HistoryEntry>, ShareImageError> {
        self.load()
    }

    pub fn len(&self) -> Result<usize, ShareImageError> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, ShareImageError> {
        Ok(self.len()? == 0)
    }

    /// Remove the entry with `id`. Returns whether one was removed.
    pub fn remove(&self, id: &str) -> Result<bool, ShareImageError> {
        let _guard = self.guard();
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        self.notifier.notify(&Event::HistoryRemoved { id: id.to_string() });
        Ok(true)
    }

    /// Remove everything. Returns how many entries went.
    pub fn clear(&self) -> Result<usize, ShareImageError> {
        let _guard = self.guard();
        let count = self.load()?.len();
        self.storage.remove(HISTORY_KEY)?;
        self.notifier.notify(&Event::HistoryCleared);
        Ok(count)
    }

    /// The editable state stored with entry `id`.
    pub fn restore(&self, id: &str) -> Result<RestoredState, ShareImageError> {
        let entry = self
            .get(id)?
            .ok_or_else(|| ShareImageError::HistoryEntryNotFound { id: id.to_string() })?;
        self.notifier.notify(&Event::HistoryRestored { id: entry.id.clone() });
        Ok(RestoredState {
            content: entry.content,
            template_id: entry.template_id,
            style: entry.style,
        })
    }

    /// Case-insensitive match on content, template id or filename. A blank
    /// query returns everything.
    pub fn search(&self, query: &str) -> Result<Vec<HistoryEntry>, ShareImageError> {
        let entries = self.load()?;
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(entries);
        }
        Ok(entries.into_iter().filter(|e| e.matches(&needle)).collect())
    }

    /// Entries grouped by UTC calendar day, newest day first.
    pub fn group_by_date(&self) -> Result<Vec<(NaiveDate, Vec<HistoryEntry>)>, ShareImageError> {
        let mut groups: Vec<(NaiveDate, Vec<HistoryEntry>)> = Vec::new();
        for entry in self.load()? {
            let day = entry.created_at.date_naive();
            match groups.iter_mut().find(|(d, _)| *d == day) {
                Some((_, list)) => list.push(entry),
                None => groups.push((day, vec![entry])),
            }
        }
        Ok(groups)
    }

    pub fn stats(&self) -> Result<HistoryStats, ShareImageError> {
        let entries = self.load()?;
        let mut stats = HistoryStats {
            total: entries.len(),
            ..HistoryStats::default()
        };
        for e in &entries {
            *stats.by_template.entry(e.template_id.clone()).or_default() += 1;
            *stats
                .by_format
                .entry(e.output_meta.format.to_string())
                .or_default() += 1;
        }
        stats.oldest = entries.iter().map(|e| e.created_at).min();
        stats.newest = entries.iter().map(|e| e.created_at).max();
        Ok(stats)
    }

    pub fn export(&self) -> Result<HistoryExport, ShareImageError> {
        let data = self.load()?;
        Ok(HistoryExport {
            version: EXPORT_VERSION.to_string(),
            timestamp: Utc::now(),
            count: data.len(),
            data,
        })
    }

    pub fn export_json(&self) -> Result<String, ShareImageError> {
        serde_json::to_string_pretty(&self.export()?)
            .map_err(|e| ShareImageError::Internal(format!("history export: {}", e)))
    }

    /// Write `history-export-<epochMillis>.json` into `dir`.
    pub fn export_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ShareImageError> {
        let export = self.export()?;
        let dir = dir.as_ref();
        let path = dir.join(naming::history_export_filename(
            export.timestamp.timestamp_millis(),
        ));
        let write_err = |e: std::io::Error| ShareImageError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        };

        std::fs::create_dir_all(dir).map_err(write_err)?;
        let json = serde_json::to_vec_pretty(&export)
            .map_err(|e| ShareImageError::Internal(format!("history export: {}", e)))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        info!("Exported {} history entries to {}", export.count, path.display());
        Ok(path)
    }

    /// Merge an exported document ahead of the current entries.
    ///
    /// Returns how many imported entries were kept after dedup and trim.
    ///
    /// # Errors
    /// `InvalidFormat` when the document is not JSON, `data` is not an
    /// array, or an entry is malformed. Nothing is written in that case.
    pub fn import(&self, json: &str) -> Result<usize, ShareImageError> {
        let doc: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ShareImageError::InvalidFormat(format!("not JSON: {}", e)))?;
        let data = doc
            .get("data")
            .filter(|d| d.is_array())
            .cloned()
            .ok_or_else(|| ShareImageError::InvalidFormat("`data` must be an array".into()))?;
        let imported: Vec<HistoryEntry> = serde_json::from_value(data)
            .map_err(|e| ShareImageError::InvalidFormat(format!("malformed entry: {}", e)))?;

        let _guard = self.guard();
        let head = imported.len();
        let mut merged = imported;
        merged.extend(self.load()?);
        let kept = dedup_and_trim(&mut merged, self.capacity, head);
        self.save(&merged)?;

        info!("Imported {} of {} history entries", kept, head);
        self.notifier.notify(&Event::HistoryImported { count: kept });
        Ok(kept)
    }
}
