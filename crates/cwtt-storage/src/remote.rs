//! Remote mirroring of accepted records: batched REST upsert with per-batch
//! failure isolation.

use std::time::Duration;

use anyhow::{ensure, Context};
use async_trait::async_trait;
use cwtt_core::RawRecord;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Result of mirroring one run's records. A failed batch is reported here, it
/// never blocks submission of the remaining batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteUpsertOutcome {
    pub written: usize,
    pub failed: usize,
    /// 1-based indexes of the batches that were rejected.
    pub failed_batches: Vec<usize>,
}

/// Submits one prepared batch toward the remote store.
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    async fn submit(&self, batch_index: usize, batch: &[RawRecord]) -> anyhow::Result<()>;
}

/// Destination for mirroring a run's accepted records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn upsert(&self, records: &[RawRecord]) -> RemoteUpsertOutcome;
}

/// Split `records` into fixed-size batches and submit each independently.
/// Batch failures are logged and reported in the outcome.
pub async fn upsert_in_batches(
    records: &[RawRecord],
    batch_size: usize,
    submitter: &dyn BatchSubmitter,
) -> RemoteUpsertOutcome {
    let mut outcome = RemoteUpsertOutcome::default();
    let batch_size = batch_size.max(1);

    for (index, batch) in records.chunks(batch_size).enumerate() {
        let batch_index = index + 1;
        match submitter.submit(batch_index, batch).await {
            Ok(()) => {
                outcome.written += batch.len();
            }
            Err(err) => {
                warn!(batch_index, rows = batch.len(), error = %err, "remote batch rejected");
                outcome.failed += batch.len();
                outcome.failed_batches.push(batch_index);
            }
        }
    }

    outcome
}

/// Supabase REST upsert sink. One POST per batch against
/// `<base>/rest/v1/<table>` with merge-duplicates semantics; 200/201 is
/// success, anything else is a recoverable per-batch failure.
#[derive(Debug)]
pub struct SupabaseSink {
    endpoint: String,
    api_key: String,
    batch_size: usize,
    client: reqwest::Client,
}

impl SupabaseSink {
    pub fn new(
        base_url: &str,
        api_key: &str,
        table: &str,
        batch_size: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building supabase client")?;
        Ok(Self {
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key: api_key.to_string(),
            batch_size: batch_size.max(1),
            client,
        })
    }

    fn row_json(record: &RawRecord) -> Value {
        let mut row = json!({
            "entity_key": record.entity_key,
            "natural_key": record.natural_key.as_str(),
            "ordering_value": record.ordering.to_string(),
            "collected_at": record.collected_at.to_rfc3339(),
        });
        for (field, value) in &record.payload {
            row[field] = Value::String(value.clone());
        }
        row
    }
}

#[async_trait]
impl BatchSubmitter for SupabaseSink {
    async fn submit(&self, batch_index: usize, batch: &[RawRecord]) -> anyhow::Result<()> {
        let rows: Vec<Value> = batch.iter().map(Self::row_json).collect();
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await
            .with_context(|| format!("submitting batch {batch_index} to {}", self.endpoint))?;

        let status = response.status().as_u16();
        ensure!(
            status == 200 || status == 201,
            "upsert batch {batch_index} rejected with status {status}"
        );
        info!(batch_index, rows = batch.len(), "remote batch written");
        Ok(())
    }
}

#[async_trait]
impl RecordSink for SupabaseSink {
    async fn upsert(&self, records: &[RawRecord]) -> RemoteUpsertOutcome {
        upsert_in_batches(records, self.batch_size, self).await
    }
}
