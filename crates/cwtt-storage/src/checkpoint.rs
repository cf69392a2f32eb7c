//! Durable checkpoint table: one high-water mark per entity, kept in a flat
//! CSV read fully at run start and rewritten fully at run end.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use cwtt_core::{Checkpoint, CursorValue};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRow {
    entity_key: String,
    last_value: String,
    last_updated: String,
}

/// In-memory view of the checkpoint file. Current-state table, not an append
/// log: `upsert` overwrites any prior row for the same entity.
#[derive(Debug, Clone, Default)]
pub struct CheckpointTable {
    rows: BTreeMap<String, Checkpoint>,
}

impl CheckpointTable {
    pub fn get(&self, entity_key: &str) -> Option<&Checkpoint> {
        self.rows.get(entity_key)
    }

    pub fn upsert(&mut self, entity_key: &str, last_value: CursorValue, last_updated: DateTime<Utc>) {
        self.rows.insert(
            entity_key.to_string(),
            Checkpoint {
                entity_key: entity_key.to_string(),
                last_value,
                last_updated,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.rows.values()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole table. A missing or unreadable file degrades to an
    /// empty table (all checkpoints absent) with a warning; rows that fail to
    /// parse are skipped individually.
    pub fn load(&self) -> CheckpointTable {
        let mut table = CheckpointTable::default();

        if !self.path.exists() {
            return table;
        }

        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "checkpoint file unreadable, treating all checkpoints as absent");
                return table;
            }
        };

        for result in reader.deserialize::<CheckpointRow>() {
            let row = match result {
                Ok(row) => row,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "skipping malformed checkpoint row");
                    continue;
                }
            };

            let last_value = match row.last_value.parse::<CursorValue>() {
                Ok(value) => value,
                Err(err) => {
                    warn!(entity_key = %row.entity_key, error = %err, "skipping checkpoint with unparsable cursor");
                    continue;
                }
            };
            let last_updated = match DateTime::parse_from_rfc3339(&row.last_updated) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(err) => {
                    warn!(entity_key = %row.entity_key, error = %err, "skipping checkpoint with unparsable timestamp");
                    continue;
                }
            };

            table.upsert(&row.entity_key, last_value, last_updated);
        }

        table
    }

    /// Rewrite the whole table atomically (temp file + rename).
    pub fn save(&self, table: &CheckpointTable) -> anyhow::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating checkpoint directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.checkpoints.tmp", Uuid::new_v4()));
        {
            let mut writer = csv::Writer::from_path(&temp_path)
                .with_context(|| format!("opening {}", temp_path.display()))?;
            for checkpoint in table.iter() {
                writer
                    .serialize(CheckpointRow {
                        entity_key: checkpoint.entity_key.clone(),
                        last_value: checkpoint.last_value.to_string(),
                        last_updated: checkpoint.last_updated.to_rfc3339(),
                    })
                    .with_context(|| format!("writing checkpoint row {}", checkpoint.entity_key))?;
            }
            writer
                .flush()
                .with_context(|| format!("flushing {}", temp_path.display()))?;
        }

        std::fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "renaming {} -> {}",
                temp_path.display(),
                self.path.display()
            )
        })
    }

    /// Copy the current table to `checkpoint_snapshot_<stamp>.csv` under
    /// `dir`. Returns `None` when no checkpoint file exists yet.
    pub fn snapshot_to(&self, dir: &Path, stamp: &str) -> anyhow::Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
        let target = dir.join(format!("checkpoint_snapshot_{stamp}.csv"));
        std::fs::copy(&self.path, &target).with_context(|| {
            format!("copying {} -> {}", self.path.display(), target.display())
        })?;
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().unwrap()
    }

    #[test]
    fn missing_file_means_all_absent() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("history.csv"));
        let table = store.load();
        assert!(table.is_empty());
        assert!(table.get("tteoksan").is_none());
    }

    #[test]
    fn upsert_overwrites_prior_row_and_round_trips() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("history.csv"));

        let mut table = store.load();
        table.upsert(
            "tteoksan",
            CursorValue::Timestamp(ts(2025, 12, 10)),
            ts(2025, 12, 10),
        );
        table.upsert(
            "tteoksan",
            CursorValue::Timestamp(ts(2025, 12, 12)),
            ts(2025, 12, 12),
        );
        table.upsert("gangnam-gu", CursorValue::Count(4100), ts(2025, 12, 12));
        store.save(&table).unwrap();

        let reloaded = store.load();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get("tteoksan").unwrap().last_value,
            CursorValue::Timestamp(ts(2025, 12, 12))
        );
        assert_eq!(
            reloaded.get("gangnam-gu").unwrap().last_value,
            CursorValue::Count(4100)
        );
    }

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(
            &path,
            "entity_key,last_value,last_updated\n\
             tteoksan,ts:2025-12-10T00:00:00Z,2025-12-10T06:00:00+00:00\n\
             broken,not-a-cursor,2025-12-10T06:00:00+00:00\n",
        )
        .unwrap();

        let table = CheckpointStore::new(&path).load();
        assert_eq!(table.len(), 1);
        assert!(table.get("broken").is_none());
    }

    #[test]
    fn snapshot_copies_current_table() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("history.csv"));

        assert!(store
            .snapshot_to(dir.path(), "20260120")
            .unwrap()
            .is_none());

        let mut table = CheckpointTable::default();
        table.upsert("tteoksan", CursorValue::Count(12), ts(2026, 1, 20));
        store.save(&table).unwrap();

        let snapshot = store.snapshot_to(dir.path(), "20260120").unwrap().unwrap();
        assert!(snapshot.ends_with("checkpoint_snapshot_20260120.csv"));
        assert_eq!(CheckpointStore::new(snapshot).load().len(), 1);
    }
}
