//! Per-run report bundle: a human-readable brief plus the machine-readable
//! delta, written under `reports/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::pipeline::RunSummary;

pub const BRIEF_FILE: &str = "run_brief.md";
pub const DELTA_FILE: &str = "records_delta.json";

pub fn write_reports(reports_root: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir).with_context(|| format!("creating {}", run_dir.display()))?;

    fs::write(run_dir.join(BRIEF_FILE), render_brief(summary))
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    let delta = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join(DELTA_FILE), delta).with_context(|| format!("writing {DELTA_FILE}"))?;

    Ok(run_dir)
}

fn render_brief(summary: &RunSummary) -> String {
    let mut lines = vec![
        "# Collection Run Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Entities processed: {}", summary.entities_processed),
        format!("- Entities skipped: {}", summary.entities_skipped),
        format!("- New records: {}", summary.new_records),
        String::new(),
        "## Per-Entity Delta".to_string(),
    ];

    for entity in &summary.entities {
        let mut line = format!(
            "- {} ({}): {} -> {} (+{}, stale {}, seen {})",
            entity.display_name,
            entity.source_id,
            entity.previous_count,
            entity.new_total,
            entity.accepted,
            entity.rejected_stale,
            entity.rejected_seen,
        );
        if entity.skipped {
            line.push_str(" [skipped]");
        }
        if let Some(remote) = &entity.remote {
            line.push_str(&format!(
                " [remote: {} written, {} failed]",
                remote.written, remote.failed
            ));
        }
        lines.push(line);
    }
    lines.push(String::new());
    lines.join("\n")
}

/// The most recent run briefs, newest first, for `report --runs N`.
pub fn latest_briefs(reports_root: &Path, limit: usize) -> Result<Vec<(String, String)>> {
    if !reports_root.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
    {
        let entry = entry?;
        let brief_path = entry.path().join(BRIEF_FILE);
        if !brief_path.exists() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        runs.push((modified, entry.file_name().to_string_lossy().into_owned(), brief_path));
    }

    runs.sort_by(|a, b| b.0.cmp(&a.0));
    runs.truncate(limit);

    let mut briefs = Vec::new();
    for (_, run_id, path) in runs {
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        briefs.push((run_id, text));
    }
    Ok(briefs)
}
