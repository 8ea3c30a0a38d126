//! Failed-sync dump file writer (section 6). When a run produces one or
//! more `error` outcomes and dumping is enabled, write a plain-text
//! report under `data/failed-sync-<user>-<timestamp>.txt` with the run
//! summary, per-failed-book detail, and a trailing footer line.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::model::BookOutcome;
use crate::result_collector::Summary;

pub fn dump_path(dir: &Path, user: &str, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "failed-sync-{user}-{}.txt",
        now.format("%Y-%m-%dT%H-%M-%SZ")
    ))
}

/// Renders the dump file's contents; pure so it's testable without
/// touching the filesystem.
pub fn render(user: &str, summary: &Summary, failures: &[BookOutcome], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ShelfBridge failed-sync report for user {user}");
    let _ = writeln!(out, "generated at {}", now.to_rfc3339());
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "summary: total={} synced={} completed={} auto_added={} skipped={} errors={}",
        summary.total, summary.synced, summary.completed, summary.auto_added, summary.skipped, summary.errors
    );
    let _ = writeln!(out);

    for (i, outcome) in failures.iter().enumerate() {
        let _ = writeln!(out, "--- failure {} ---", i + 1);
        let _ = writeln!(out, "book: {}", outcome.book_ref);
        let _ = writeln!(out, "status: {:?}", outcome.status);
        let _ = writeln!(
            out,
            "progress: before={:?} after={} changed={}",
            outcome.progress.before, outcome.progress.after, outcome.progress.changed
        );
        let _ = writeln!(out, "action: {}", outcome.action_text);
        if let Some(reason) = &outcome.reason {
            let _ = writeln!(out, "reason: {reason}");
        }
        if !outcome.errors.is_empty() {
            let _ = writeln!(out, "errors: {}", outcome.errors.join("; "));
        }
        let _ = writeln!(out, "timing_ms: {}", outcome.timing_ms);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "end of report ({} failure(s))", failures.len());
    out
}

pub async fn write_dump(
    dir: &Path,
    user: &str,
    summary: &Summary,
    failures: &[BookOutcome],
) -> anyhow::Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }
    tokio::fs::create_dir_all(dir).await?;
    let now = Utc::now();
    let path = dump_path(dir, user, now);
    let contents = render(user, summary, failures, now);
    tokio::fs::write(&path, contents).await?;
    tracing::warn!(path = %path.display(), failures = failures.len(), "wrote failed-sync dump");
    Ok(Some(path))
}
