//! Append-only local record log, and the seen-key index rebuilt from it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use cwtt_core::{NaturalKey, RawRecord};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct SinkRow {
    entity_key: String,
    natural_key: String,
    ordering: String,
    collected_at: String,
    payload: String,
}

/// Natural keys already present in the local log, plus per-entity counts.
/// Seeds the dedup filter at run start so a re-run after a lost checkpoint
/// write still skips records that were already appended.
#[derive(Debug, Default, Clone)]
pub struct SeenIndex {
    keys: HashSet<NaturalKey>,
    per_entity: HashMap<String, u64>,
}

impl SeenIndex {
    pub fn contains(&self, key: &NaturalKey) -> bool {
        self.keys.contains(key)
    }

    pub fn count_for(&self, entity_key: &str) -> u64 {
        self.per_entity.get(entity_key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &HashSet<NaturalKey> {
        &self.keys
    }

    pub fn into_keys(self) -> HashSet<NaturalKey> {
        self.keys
    }

    fn insert(&mut self, entity_key: &str, key: NaturalKey) {
        if self.keys.insert(key) {
            *self.per_entity.entry(entity_key.to_string()).or_default() += 1;
        }
    }
}

/// Durable append-only destination for accepted records. Never truncates or
/// reorders existing content.
#[derive(Debug, Clone)]
pub struct LocalSink {
    path: PathBuf,
}

impl LocalSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild the seen-key index from the accumulated log. A missing file is
    /// an empty index; malformed rows are skipped with a warning.
    pub fn load_seen(&self) -> SeenIndex {
        let mut index = SeenIndex::default();

        if !self.path.exists() {
            return index;
        }

        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "local sink unreadable, starting with empty seen index");
                return index;
            }
        };

        for result in reader.deserialize::<SinkRow>() {
            match result {
                Ok(row) => index.insert(&row.entity_key, NaturalKey::from(row.natural_key)),
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "skipping malformed sink row");
                }
            }
        }

        index
    }

    /// Append records to the log, writing the header only when the file is
    /// created. Returns the number of rows appended.
    pub fn append(&self, records: &[RawRecord]) -> anyhow::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating sink directory {}", parent.display()))?;
        }

        let fresh = !self.path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);

        for record in records {
            let payload = serde_json::to_string(&record.payload)
                .context("serializing record payload")?;
            writer
                .serialize(SinkRow {
                    entity_key: record.entity_key.clone(),
                    natural_key: record.natural_key.as_str().to_string(),
                    ordering: record.ordering.to_string(),
                    collected_at: record.collected_at.to_rfc3339(),
                    payload,
                })
                .with_context(|| format!("appending record {}", record.natural_key))?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))?;

        Ok(records.len())
    }
}
