use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use cwtt_collect::{config::remote_table_for, CollectionJob, Collector, CollectorConfig};
use cwtt_sources::{
    catchtable::CatchTableReviewSource, naver::NaverTrendSource, registry::EntityRegistry,
    seoul::SeoulPopulationSource, PageSource,
};
use cwtt_storage::{CheckpointStore, RecordSink, SupabaseSink};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cwtt")]
#[command(about = "Culinary Class Wars trend tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one collection pass across the configured sources.
    Collect {
        /// Restrict the run to a single source id.
        #[arg(long)]
        source: Option<String>,
    },
    /// Print the most recent run briefs.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
    /// Copy the checkpoint table into the reports directory.
    Snapshot,
}

const SOURCE_IDS: [&str; 3] = [
    cwtt_sources::seoul::SOURCE_ID,
    cwtt_sources::catchtable::SOURCE_ID,
    cwtt_sources::naver::SOURCE_ID,
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = CollectorConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Collect { source: None }) {
        Commands::Collect { source } => {
            let registry = EntityRegistry::load(&config.registry_path)?;
            let jobs = build_jobs(&config, &registry, source.as_deref())?;
            if jobs.is_empty() {
                bail!("no enabled entities for the requested sources");
            }

            let collector = Collector::new(config)?;
            let summary = collector.run(&jobs).await?;
            println!(
                "collection complete: run_id={} entities={} new_records={} skipped={}",
                summary.run_id,
                summary.entities_processed,
                summary.new_records,
                summary.entities_skipped
            );
        }
        Commands::Report { runs } => {
            let briefs = cwtt_collect::report::latest_briefs(&config.reports_dir(), runs)?;
            if briefs.is_empty() {
                println!("no run reports yet");
            }
            for (run_id, text) in briefs {
                println!("=== {run_id} ===\n{text}");
            }
        }
        Commands::Snapshot => {
            let store = CheckpointStore::new(config.checkpoint_path());
            let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            match store.snapshot_to(&config.reports_dir(), &stamp)? {
                Some(path) => println!("checkpoint snapshot written to {}", path.display()),
                None => println!("no checkpoint table to snapshot yet"),
            }
        }
    }

    Ok(())
}

fn build_jobs(
    config: &CollectorConfig,
    registry: &EntityRegistry,
    only: Option<&str>,
) -> Result<Vec<CollectionJob>> {
    if let Some(requested) = only {
        if !SOURCE_IDS.contains(&requested) {
            bail!("unknown source `{requested}`, expected one of {SOURCE_IDS:?}");
        }
    }

    let mut jobs = Vec::new();
    for source_id in SOURCE_IDS {
        if only.is_some_and(|requested| requested != source_id) {
            continue;
        }
        // Credentials are only demanded for sources that actually have
        // enabled entities.
        let entities = registry.entities_for(source_id);
        if entities.is_empty() {
            warn!(source_id, "no enabled entities in the registry, skipping source");
            continue;
        }
        config.ensure_source_ready(source_id)?;

        let source = build_source(config, source_id)?;
        let remote = build_remote(config, source_id)?;
        jobs.push(CollectionJob {
            source,
            entities,
            remote,
        });
    }
    Ok(jobs)
}

fn build_source(config: &CollectorConfig, source_id: &str) -> Result<Arc<dyn PageSource>> {
    let source: Arc<dyn PageSource> = match source_id {
        cwtt_sources::seoul::SOURCE_ID => {
            let api_key = config
                .seoul_api_key
                .as_deref()
                .context("SEOUL_API_KEY is not set")?;
            Arc::new(SeoulPopulationSource::new(api_key))
        }
        cwtt_sources::naver::SOURCE_ID => {
            let creds = config.naver.as_ref().context("Naver credentials not set")?;
            Arc::new(NaverTrendSource::new(
                &creds.client_id,
                &creds.client_secret,
                config.default_boundary.date_naive(),
                Utc::now().date_naive(),
            ))
        }
        cwtt_sources::catchtable::SOURCE_ID => Arc::new(CatchTableReviewSource::new()),
        other => bail!("unknown source `{other}`"),
    };
    Ok(source)
}

fn build_remote(
    config: &CollectorConfig,
    source_id: &str,
) -> Result<Option<Arc<dyn RecordSink>>> {
    let Some(supabase) = &config.supabase else {
        return Ok(None);
    };
    let Some(table) = remote_table_for(source_id) else {
        return Ok(None);
    };
    let sink = SupabaseSink::new(
        &supabase.base_url,
        &supabase.api_key,
        table,
        config.remote_batch_size,
        Duration::from_secs(config.http_timeout_secs),
    )?;
    Ok(Some(Arc::new(sink)))
}
