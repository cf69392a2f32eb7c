//! Pipeline orchestration for the incremental collection & diff tracker.

pub mod config;
pub mod filter;
pub mod pipeline;
pub mod report;

pub const CRATE_NAME: &str = "cwtt-collect";

pub use config::{CollectorConfig, NaverCredentials, SupabaseConfig};
pub use filter::CutoffFilter;
pub use pipeline::{CollectionJob, Collector, EntityOutcome, RunSummary};
