//! Durable state and HTTP plumbing for the collection pipeline.

pub mod archive;
pub mod checkpoint;
pub mod http;
pub mod remote;
pub mod sink;

pub const CRATE_NAME: &str = "cwtt-storage";

pub use archive::{RawPayloadStore, StoredPayload};
pub use checkpoint::{CheckpointStore, CheckpointTable};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use remote::{upsert_in_batches, BatchSubmitter, RecordSink, RemoteUpsertOutcome, SupabaseSink};
pub use sink::{LocalSink, SeenIndex};
