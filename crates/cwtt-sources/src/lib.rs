//! Source adapter contracts + the three collection adapters
//! (Seoul floating population, Naver DataLab trends, CatchTable reviews).

use std::collections::BTreeMap;

use async_trait::async_trait;
use cwtt_core::{CursorKind, FetchWindow, RawRecord};
use cwtt_storage::HttpFetcher;
use thiserror::Error;

pub mod catchtable;
pub mod naver;
pub mod registry;
pub mod seoul;

pub const CRATE_NAME: &str = "cwtt-sources";

pub use registry::{DistrictEntry, EntityRegistry, KeywordGroupEntry, RestaurantEntry};

/// One unit of incremental tracking: a restaurant feed, a district sensor
/// service, a keyword group. Source-specific parameters ride along as plain
/// strings so the pipeline stays generic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    pub entity_key: String,
    pub display_name: String,
    pub params: BTreeMap<String, String>,
}

impl EntitySpec {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// What one page fetch produced.
#[derive(Debug, Clone)]
pub enum PageOutcome {
    Records(Vec<RawRecord>),
    /// Well-formed 2xx payload with zero rows: the upstream is truly drained.
    Exhausted,
    /// Retries exhausted or payload shape unrecognized. The window is skipped
    /// this run and retried on the next one; never fatal.
    Unavailable,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("entity `{entity}` missing required parameter `{param}`")]
    MissingParam { entity: String, param: String },
}

/// A paginated upstream source. Implementations own request construction and
/// defensive payload parsing; retry/backoff lives in the `HttpFetcher`.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// The one cursor kind this source checkpoints on.
    fn cursor_kind(&self) -> CursorKind;

    /// Shape the run's fetch window. Sources that are not offset-paginated
    /// narrow this to a single page.
    fn fetch_window(&self, defaults: FetchWindow) -> FetchWindow {
        defaults
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        entity: &EntitySpec,
        window_start: u64,
        window_end: u64,
    ) -> Result<PageOutcome, SourceError>;
}

pub(crate) fn json_field_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
