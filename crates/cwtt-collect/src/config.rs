//! Process configuration, built once at startup and passed by reference into
//! every component. No component reads the environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use cwtt_storage::{BackoffPolicy, HttpClientConfig};

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct NaverCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub data_dir: PathBuf,
    pub registry_path: PathBuf,
    pub archive_enabled: bool,
    /// Global start boundary used when an entity has no checkpoint yet.
    /// Records at or before this instant count as already collected.
    pub default_boundary: DateTime<Utc>,
    /// Consecutive already-collected records tolerated before the fetch loop
    /// stops. Robustness/cost trade-off for out-of-order delivery inside a
    /// page, not a correctness knob.
    pub stale_stop_threshold: u32,
    pub page_batch_size: u64,
    pub max_batches: u32,
    pub remote_batch_size: usize,
    pub http_timeout_secs: u64,
    pub page_delay_ms: u64,
    pub user_agent: String,
    pub seoul_api_key: Option<String>,
    pub naver: Option<NaverCredentials>,
    pub supabase: Option<SupabaseConfig>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = env_opt("CWTT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let registry_path = env_opt("CWTT_REGISTRY")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./entities.yaml"));

        let default_boundary = match env_opt("CWTT_DEFAULT_BOUNDARY") {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .with_context(|| format!("parsing CWTT_DEFAULT_BOUNDARY `{raw}`"))?
                .with_timezone(&Utc),
            // Season 2 premiere date.
            None => Utc
                .with_ymd_and_hms(2025, 12, 9, 0, 0, 0)
                .single()
                .context("constructing default boundary")?,
        };

        let naver = match (env_opt("NAVER_CLIENT_ID"), env_opt("NAVER_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(NaverCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            _ => bail!("NAVER_CLIENT_ID and NAVER_CLIENT_SECRET must be set together"),
        };

        let supabase = match (env_opt("SUPABASE_URL"), env_opt("SUPABASE_KEY")) {
            (Some(base_url), Some(api_key)) => Some(SupabaseConfig { base_url, api_key }),
            (None, None) => None,
            _ => bail!("SUPABASE_URL and SUPABASE_KEY must be set together"),
        };

        Ok(Self {
            data_dir,
            registry_path,
            archive_enabled: env_opt("CWTT_ARCHIVE_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            default_boundary,
            stale_stop_threshold: env_parsed("CWTT_STALE_STOP_THRESHOLD", 3),
            page_batch_size: env_parsed("CWTT_PAGE_BATCH_SIZE", 1000),
            max_batches: env_parsed("CWTT_MAX_BATCHES", 100),
            remote_batch_size: env_parsed("CWTT_REMOTE_BATCH_SIZE", 500),
            http_timeout_secs: env_parsed("CWTT_HTTP_TIMEOUT_SECS", 30),
            page_delay_ms: env_parsed("CWTT_PAGE_DELAY_MS", 200),
            user_agent: env_opt("CWTT_USER_AGENT").unwrap_or_else(|| "cwtt-bot/0.1".to_string()),
            seoul_api_key: env_opt("SEOUL_API_KEY"),
            naver,
            supabase,
        })
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("checkpoint_history.csv")
    }

    pub fn sink_path(&self, source_id: &str) -> PathBuf {
        self.data_dir.join(format!("{source_id}_records.csv"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy::default(),
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }

    /// Fail-fast credential check for one source, run before any fetching.
    pub fn ensure_source_ready(&self, source_id: &str) -> Result<()> {
        match source_id {
            cwtt_sources::seoul::SOURCE_ID if self.seoul_api_key.is_none() => {
                bail!("SEOUL_API_KEY is required for the {source_id} source")
            }
            cwtt_sources::naver::SOURCE_ID if self.naver.is_none() => {
                bail!("NAVER_CLIENT_ID/NAVER_CLIENT_SECRET are required for the {source_id} source")
            }
            _ => Ok(()),
        }
    }
}

/// Remote table the original dashboards read, per source.
pub fn remote_table_for(source_id: &str) -> Option<&'static str> {
    match source_id {
        cwtt_sources::seoul::SOURCE_ID => Some("seoul_floating_population"),
        cwtt_sources::catchtable::SOURCE_ID => Some("catchtable_reviews"),
        cwtt_sources::naver::SOURCE_ID => Some("chief_trend_value"),
        _ => None,
    }
}
