//! Core domain model for the incremental collection & diff tracker.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "cwtt-core";

/// Which kind of comparable a source checkpoints on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorKind {
    Timestamp,
    Count,
}

/// Opaque comparable high-water mark: an observation timestamp or a running count.
///
/// Ordering is only meaningful between values of the same kind; every source
/// declares exactly one kind, and a persisted checkpoint of the other kind is
/// treated as absent by the pipeline rather than compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CursorValue {
    Count(u64),
    Timestamp(DateTime<Utc>),
}

impl CursorValue {
    pub fn kind(&self) -> CursorKind {
        match self {
            CursorValue::Count(_) => CursorKind::Count,
            CursorValue::Timestamp(_) => CursorKind::Timestamp,
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Count(n) => write!(f, "count:{n}"),
            CursorValue::Timestamp(ts) => {
                write!(f, "ts:{}", ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CursorParseError {
    #[error("unknown cursor prefix in `{0}`")]
    UnknownPrefix(String),
    #[error("invalid count cursor `{0}`")]
    InvalidCount(String),
    #[error("invalid timestamp cursor `{0}`")]
    InvalidTimestamp(String),
}

impl FromStr for CursorValue {
    type Err = CursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(raw) = s.strip_prefix("count:") {
            let n = raw
                .parse::<u64>()
                .map_err(|_| CursorParseError::InvalidCount(s.to_string()))?;
            Ok(CursorValue::Count(n))
        } else if let Some(raw) = s.strip_prefix("ts:") {
            let ts = DateTime::parse_from_rfc3339(raw)
                .map_err(|_| CursorParseError::InvalidTimestamp(s.to_string()))?;
            Ok(CursorValue::Timestamp(ts.with_timezone(&Utc)))
        } else {
            Err(CursorParseError::UnknownPrefix(s.to_string()))
        }
    }
}

/// Persisted high-water mark for one entity. At most one row per entity key;
/// overwritten on every successful collection, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entity_key: String,
    pub last_value: CursorValue,
    pub last_updated: DateTime<Utc>,
}

/// Run-independent identity of a collected record, joined from its key fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    const SEPARATOR: char = '|';

    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Self {
        let joined = parts
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(&Self::SEPARATOR.to_string());
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NaturalKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit fetched from an upstream source, normalized for the filter/sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_key: String,
    pub natural_key: NaturalKey,
    pub ordering: CursorValue,
    pub payload: BTreeMap<String, String>,
    pub collected_at: DateTime<Utc>,
}

/// Verdict of the cutoff/dedup filter for one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Natural key already present in the accumulated output.
    RejectSeen,
    /// Ordering value at or before the checkpoint cutoff.
    RejectStale,
}

/// Contiguous range of upstream pages scanned in one run. Offsets advance
/// strictly forward; a run never revisits a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_offset: u64,
    pub batch_size: u64,
    pub max_batches: u32,
}

impl FetchWindow {
    pub fn new(start_offset: u64, batch_size: u64, max_batches: u32) -> Self {
        Self {
            start_offset,
            batch_size: batch_size.max(1),
            max_batches,
        }
    }

    /// Inclusive `(start, end)` page bounds, in fetch order.
    pub fn pages(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.max_batches as u64).map(move |i| {
            let start = self.start_offset + i * self.batch_size;
            (start, start + self.batch_size - 1)
        })
    }
}
