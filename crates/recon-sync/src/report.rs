//! Run reports: markdown summary, JSON dump and Parquet snapshots with a
//! checksummed manifest under `reports/<run_id>/`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use recon_core::{ObjectStats, RunStatus, RunTotals};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use crate::orchestrator::RunOutcome;
use crate::reconciler::ReviewItem;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub totals: RunTotals,
    pub objects: Vec<ObjectStats>,
    pub review_queue: Vec<ReviewItem>,
}

impl RunReport {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let run = &outcome.run;
        Self {
            run_id: run.id,
            dry_run: run.dry_run,
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            error_message: run.error_message.clone(),
            totals: run.totals,
            objects: outcome.objects.iter().map(|o| o.stats.clone()).collect(),
            review_queue: outcome.review_items().cloned().collect(),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Reconciliation Run".to_string(),
            String::new(),
            format!("- Run ID: `{}`", self.run_id),
            format!("- Status: {}", self.status.as_str()),
            format!("- Dry run: {}", self.dry_run),
            format!("- Started: {}", self.started_at),
        ];
        if let Some(finished) = self.finished_at {
            lines.push(format!("- Finished: {finished}"));
        }
        if let Some(err) = &self.error_message {
            lines.push(format!("- Error: {err}"));
        }
        lines.push(String::new());
        lines.push("## Objects".to_string());
        lines.push(String::new());
        lines.push(
            "| object | fetched | matched | created | updated | skipped | orphaned | errors | review |"
                .to_string(),
        );
        lines.push("|---|---:|---:|---:|---:|---:|---:|---:|---:|".to_string());
        for s in &self.objects {
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                s.object_type,
                s.fetched,
                s.matched,
                s.created,
                s.updated,
                s.skipped,
                s.orphaned,
                s.errors,
                s.flagged_for_review
            ));
        }
        let t = &self.totals;
        lines.push(format!(
            "| **total** | | {} | {} | {} | {} | | {} | |",
            t.matched, t.created, t.updated, t.skipped, t.errors
        ));
        lines.push(String::new());
        lines.push(format!("## Review Queue ({})", self.review_queue.len()));
        lines.push(String::new());
        if self.review_queue.is_empty() {
            lines.push("- none".to_string());
        }
        for item in &self.review_queue {
            lines.push(format!(
                "- {} `{}` {} -> `{}` ({} {:.2})",
                item.object_type,
                item.source_id,
                item.display_name,
                item.internal_id,
                item.method,
                item.confidence
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes one directory per run below `root`.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    root: PathBuf,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    /// Returns the run directory.
    pub async fn write(&self, report: &RunReport) -> Result<PathBuf> {
        let dir = self.run_dir(report.run_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        fs::write(dir.join("summary.md"), report.to_markdown())
            .await
            .context("writing summary.md")?;
        let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
        fs::write(dir.join("report.json"), json)
            .await
            .context("writing report.json")?;

        self.write_snapshots(&dir, report).await?;
        Ok(dir)
    }

    async fn write_snapshots(&self, dir: &Path, report: &RunReport) -> Result<PathBuf> {
        let snapshot_dir = dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let stats_path = snapshot_dir.join("object_stats.parquet");
        let review_path = snapshot_dir.join("review_queue.parquet");
        write_parquet(&stats_path, object_stats_batch(&report.objects)?)?;
        write_parquet(&review_path, review_queue_batch(&report.review_queue)?)?;

        let manifest = SnapshotManifest {
            schema_version: 1,
            run_id: report.run_id,
            files: vec![
                manifest_entry("object_stats", dir, &stats_path)?,
                manifest_entry("review_queue", dir, &review_path)?,
            ],
        };
        let manifest_path = snapshot_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(manifest_path)
    }
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn object_stats_batch(objects: &[ObjectStats]) -> Result<RecordBatch> {
    let counter = |name: &str| ArrowField::new(name, DataType::UInt64, false);
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("object_type", DataType::Utf8, false),
        counter("fetched"),
        counter("matched"),
        counter("created"),
        counter("updated"),
        counter("skipped"),
        counter("orphaned"),
        counter("errors"),
        counter("flagged_for_review"),
    ]));
    let column = |f: fn(&ObjectStats) -> u64| -> ArrayRef {
        Arc::new(UInt64Array::from(objects.iter().map(f).collect::<Vec<_>>()))
    };
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                objects.iter().map(|s| s.object_type.key()).collect::<Vec<_>>(),
            )),
            column(|s| s.fetched),
            column(|s| s.matched),
            column(|s| s.created),
            column(|s| s.updated),
            column(|s| s.skipped),
            column(|s| s.orphaned),
            column(|s| s.errors),
            column(|s| s.flagged_for_review),
        ],
    )
    .context("building object_stats batch")
}

fn review_queue_batch(items: &[ReviewItem]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("object_type", DataType::Utf8, false),
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("display_name", DataType::Utf8, false),
        ArrowField::new("internal_id", DataType::Utf8, false),
        ArrowField::new("method", DataType::Utf8, false),
        ArrowField::new("confidence", DataType::Float64, false),
    ]));
    let internal_ids: Vec<String> = items.iter().map(|i| i.internal_id.to_string()).collect();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(
                items.iter().map(|i| i.object_type.key()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items.iter().map(|i| i.source_id.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items.iter().map(|i| i.display_name.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                internal_ids.iter().map(String::as_str).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                items.iter().map(|i| i.method.as_str()).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                items.iter().map(|i| i.confidence).collect::<Vec<_>>(),
            )),
        ],
    )
    .context("building review_queue batch")
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(run_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ObjectOutcome;
    use recon_core::{MatchMethod, MigrationRun, ObjectType};
    use tempfile::tempdir;

    fn outcome() -> RunOutcome {
        let mut run = MigrationRun::start(false, vec![ObjectType::Account, ObjectType::Contact]);
        run.status = RunStatus::Completed;
        run.finished_at = Some(Utc::now());
        let mut accounts = ObjectOutcome::new(ObjectType::Account);
        accounts.stats.fetched = 3;
        accounts.stats.created = 2;
        accounts.stats.matched = 1;
        accounts.stats.skipped = 1;
        let mut contacts = ObjectOutcome::new(ObjectType::Contact);
        contacts.stats.fetched = 1;
        contacts.stats.matched = 1;
        contacts.stats.updated = 1;
        contacts.stats.flagged_for_review = 1;
        contacts.review.push(ReviewItem {
            object_type: ObjectType::Contact,
            source_id: "003A".into(),
            display_name: "Jon Smith".into(),
            internal_id: Uuid::new_v4(),
            confidence: 0.72,
            method: MatchMethod::Fuzzy,
        });
        for o in [&accounts, &contacts] {
            run.totals.absorb(&o.stats);
        }
        RunOutcome {
            run,
            objects: vec![accounts, contacts],
        }
    }

    #[test]
    fn markdown_lists_counts_and_review_queue() {
        let report = RunReport::from_outcome(&outcome());
        let md = report.to_markdown();
        assert!(md.contains("- Status: COMPLETED"));
        assert!(md.contains("| account | 3 | 1 | 2 | 0 | 1 | 0 | 0 | 0 |"));
        assert!(md.contains("## Review Queue (1)"));
        assert!(md.contains("Jon Smith"));
        assert_eq!(report.totals.created, 2);
    }

    #[tokio::test]
    async fn writer_emits_summary_json_and_checksummed_snapshots() {
        let dir = tempdir().expect("tempdir");
        let report = RunReport::from_outcome(&outcome());
        let run_dir = ReportWriter::new(dir.path()).write(&report).await.unwrap();

        assert!(run_dir.join("summary.md").exists());
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run_dir.join("report.json")).unwrap()).unwrap();
        assert_eq!(json["review_queue"][0]["method"], "FUZZY");

        let manifest: serde_json::Value = serde_json::from_slice(
            &std::fs::read(run_dir.join("snapshots").join("manifest.json")).unwrap(),
        )
        .unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        for file in files {
            let path = run_dir.join(file["path"].as_str().unwrap());
            let bytes = std::fs::read(&path).unwrap();
            assert_eq!(file["bytes"].as_u64().unwrap(), bytes.len() as u64);
            assert_eq!(file["sha256"].as_str().unwrap(), hex::encode(Sha256::digest(&bytes)));
        }
    }
}
