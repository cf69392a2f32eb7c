//! The per-entity collection loop: checkpoint -> fetch window -> cutoff
//! filter -> sinks -> checkpoint, plus the run-level summary.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cwtt_core::{Admission, CursorValue, FetchWindow};
use cwtt_sources::{EntitySpec, PageOutcome, PageSource};
use cwtt_storage::{
    CheckpointTable, HttpFetcher, LocalSink, RawPayloadStore, RecordSink, RemoteUpsertOutcome,
    SeenIndex,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CollectorConfig;
use crate::filter::CutoffFilter;
use crate::report;

/// One source plus the entities to collect for it, and an optional remote
/// mirror for the accepted records.
pub struct CollectionJob {
    pub source: Arc<dyn PageSource>,
    pub entities: Vec<EntitySpec>,
    pub remote: Option<Arc<dyn RecordSink>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityOutcome {
    pub source_id: String,
    pub entity_key: String,
    pub display_name: String,
    pub pages_fetched: u32,
    pub accepted: u64,
    pub rejected_stale: u64,
    pub rejected_seen: u64,
    /// Records already in the local log before this run (the diff baseline).
    pub previous_count: u64,
    pub new_total: u64,
    /// True when the entity's fetch ended on an unavailable window and should
    /// be retried next run.
    pub skipped: bool,
    pub remote: Option<RemoteUpsertOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities_processed: usize,
    pub entities_skipped: usize,
    pub new_records: u64,
    pub remote_written: usize,
    pub remote_failed: usize,
    pub entities: Vec<EntityOutcome>,
}

pub struct Collector {
    config: CollectorConfig,
    http: HttpFetcher,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let mut http = HttpFetcher::new(config.http_config())?;
        if config.archive_enabled {
            http = http.with_archive(RawPayloadStore::new(config.archive_dir()));
        }
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Execute one collection run across all jobs, persist state, and write
    /// the run report. Per-entity failures degrade to skips; only local I/O
    /// errors abort the run.
    pub async fn run(&self, jobs: &[CollectionJob]) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, jobs = jobs.len(), "collection run starting");

        let checkpoint_store = cwtt_storage::CheckpointStore::new(self.config.checkpoint_path());
        let mut checkpoints = checkpoint_store.load();
        let mut entities = Vec::new();

        for job in jobs {
            let source = job.source.as_ref();
            let sink = LocalSink::new(self.config.sink_path(source.source_id()));
            let seen = sink.load_seen();

            for entity in &job.entities {
                let outcome = self
                    .run_entity(source, entity, &sink, job.remote.as_deref(), &mut checkpoints, &seen)
                    .await?;
                entities.push(outcome);
            }
        }

        // A failed checkpoint write loses the advance, not the records: the
        // next run re-dedups against the local log's natural keys.
        if let Err(err) = checkpoint_store.save(&checkpoints) {
            warn!(error = %err, "checkpoint write failed, next run will re-dedup from the local log");
        }

        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            entities_processed: entities.len(),
            entities_skipped: entities.iter().filter(|e| e.skipped).count(),
            new_records: entities.iter().map(|e| e.accepted).sum(),
            remote_written: entities
                .iter()
                .filter_map(|e| e.remote.as_ref())
                .map(|r| r.written)
                .sum(),
            remote_failed: entities
                .iter()
                .filter_map(|e| e.remote.as_ref())
                .map(|r| r.failed)
                .sum(),
            entities,
        };

        report::write_reports(&self.config.reports_dir(), &summary)?;
        info!(
            %run_id,
            entities = summary.entities_processed,
            new_records = summary.new_records,
            skipped = summary.entities_skipped,
            "collection run finished"
        );
        Ok(summary)
    }

    async fn run_entity(
        &self,
        source: &dyn PageSource,
        entity: &EntitySpec,
        sink: &LocalSink,
        remote: Option<&dyn RecordSink>,
        checkpoints: &mut CheckpointTable,
        seen: &SeenIndex,
    ) -> Result<EntityOutcome> {
        let cutoff = self.cutoff_for(source, checkpoints.get(&entity.entity_key));
        let mut filter = CutoffFilter::new(
            cutoff,
            self.config.stale_stop_threshold,
            seen.keys().clone(),
        );

        let window = source.fetch_window(FetchWindow::new(
            1,
            self.config.page_batch_size,
            self.config.max_batches,
        ));

        let mut accepted = Vec::new();
        let mut pages_fetched = 0u32;
        let mut skipped = false;

        'pages: for (index, (start, end)) in window.pages().enumerate() {
            if index > 0 {
                self.http.page_pause().await;
            }

            let outcome = match source.fetch_page(&self.http, entity, start, end).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(entity = %entity.display_name, error = %err, "entity misconfigured, skipping");
                    skipped = true;
                    break;
                }
            };
            pages_fetched += 1;

            match outcome {
                PageOutcome::Records(records) => {
                    for record in records {
                        if filter.admit(&record) == Admission::Accept {
                            accepted.push(record);
                        }
                        if filter.should_stop() {
                            info!(entity = %entity.display_name, "reached already-collected records, stopping early");
                            break 'pages;
                        }
                    }
                }
                PageOutcome::Exhausted => break,
                PageOutcome::Unavailable => {
                    skipped = true;
                    break;
                }
            }
        }

        sink.append(&accepted)
            .with_context(|| format!("appending records for {}", entity.display_name))?;

        let remote_outcome = match (remote, accepted.is_empty()) {
            (Some(remote), false) => Some(remote.upsert(&accepted).await),
            _ => None,
        };

        // An unavailable window leaves the checkpoint untouched: records
        // behind the failed window must stay collectable on the next run, and
        // the seen keys from the local log keep the rescan of the newest
        // pages idempotent.
        if !skipped {
            if let Some(new_value) = filter.next_checkpoint() {
                checkpoints.upsert(&entity.entity_key, new_value, Utc::now());
            }
        }

        let previous_count = seen.count_for(&entity.entity_key);
        let outcome = EntityOutcome {
            source_id: source.source_id().to_string(),
            entity_key: entity.entity_key.clone(),
            display_name: entity.display_name.clone(),
            pages_fetched,
            accepted: filter.accepted(),
            rejected_stale: filter.rejected_stale(),
            rejected_seen: filter.rejected_seen(),
            previous_count,
            new_total: previous_count + filter.accepted(),
            skipped,
            remote: remote_outcome,
        };
        info!(
            entity = %outcome.display_name,
            accepted = outcome.accepted,
            previous = outcome.previous_count,
            total = outcome.new_total,
            skipped = outcome.skipped,
            "entity collected"
        );
        Ok(outcome)
    }

    fn cutoff_for(
        &self,
        source: &dyn PageSource,
        checkpoint: Option<&cwtt_core::Checkpoint>,
    ) -> Option<CursorValue> {
        let fallback = match source.cursor_kind() {
            cwtt_core::CursorKind::Timestamp => {
                Some(CursorValue::Timestamp(self.config.default_boundary))
            }
            cwtt_core::CursorKind::Count => None,
        };

        match checkpoint {
            Some(cp) if cp.last_value.kind() == source.cursor_kind() => Some(cp.last_value),
            Some(cp) => {
                warn!(
                    entity_key = %cp.entity_key,
                    stored = %cp.last_value,
                    "checkpoint cursor kind does not match source, treating as absent"
                );
                fallback
            }
            None => fallback,
        }
    }
}
