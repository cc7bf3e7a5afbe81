use std::sync::Arc;

use chrono::Utc;
use recon_adapters::SourceReader;
use recon_core::{MigrationRun, ObjectType, RunStatus};
use recon_storage::Datastore;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::ReconcileSettings;
use crate::reconciler::{ObjectOutcome, ReconcileContext, ReconcilerRegistry, ReviewItem};
use crate::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Empty means the configured default list.
    pub object_types: Vec<ObjectType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run: MigrationRun,
    pub objects: Vec<ObjectOutcome>,
}

impl RunOutcome {
    pub fn review_items(&self) -> impl Iterator<Item = &ReviewItem> {
        self.objects.iter().flat_map(|o| o.review.iter())
    }
}

/// A fatal error, carried together with everything the run reached before it.
#[derive(Debug, Error)]
#[error("migration run {run_id} failed: {source}")]
pub struct RunFailed {
    pub run_id: Uuid,
    pub outcome: Box<RunOutcome>,
    #[source]
    pub source: SyncError,
}

pub struct MigrationOrchestrator {
    store: Arc<dyn Datastore>,
    source: Arc<dyn SourceReader>,
    registry: ReconcilerRegistry,
    settings: ReconcileSettings,
}

impl MigrationOrchestrator {
    pub fn new(
        store: Arc<dyn Datastore>,
        source: Arc<dyn SourceReader>,
        registry: ReconcilerRegistry,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            source,
            registry,
            settings,
        }
    }

    /// Allow-list in dependency order with duplicates removed.
    pub fn plan(&self, requested: &[ObjectType]) -> Vec<ObjectType> {
        let mut types = if requested.is_empty() {
            self.settings.objects.clone()
        } else {
            requested.to_vec()
        };
        types.sort_by_key(|t| t.dependency_rank());
        types.dedup();
        types
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome, RunFailed> {
        let object_types = self.plan(&options.object_types);
        let run = MigrationRun::start(options.dry_run, object_types);
        let span = info_span!("migration_run", run_id = %run.id, dry_run = options.dry_run);
        self.execute(run).instrument(span).await
    }

    async fn execute(&self, mut run: MigrationRun) -> Result<RunOutcome, RunFailed> {
        if let Err(err) = self.store.create_run(&run).await {
            error!(error = %err, "could not record migration run");
            run.status = RunStatus::Failed;
            run.finished_at = Some(Utc::now());
            run.error_message = Some(err.to_string());
            return Err(RunFailed {
                run_id: run.id,
                outcome: Box::new(RunOutcome {
                    run,
                    objects: Vec::new(),
                }),
                source: err.into(),
            });
        }
        info!(object_types = ?run.object_types, "migration run started");

        let mut objects = Vec::new();
        let mut failure: Option<SyncError> = None;
        for object_type in run.object_types.clone() {
            let Some(reconciler) = self.registry.get(object_type) else {
                failure = Some(SyncError::Config(format!(
                    "no reconciler registered for {object_type}"
                )));
                break;
            };
            let ctx = ReconcileContext {
                run_id: run.id,
                dry_run: run.dry_run,
                store: self.store.as_ref(),
                source: self.source.as_ref(),
            };
            let mut outcome = ObjectOutcome::new(object_type);
            let result = reconciler.reconcile(&ctx, &mut outcome).await;
            run.totals.absorb(&outcome.stats);
            let stats = &outcome.stats;
            info!(
                %object_type,
                fetched = stats.fetched,
                matched = stats.matched,
                created = stats.created,
                updated = stats.updated,
                skipped = stats.skipped,
                orphaned = stats.orphaned,
                errors = stats.errors,
                "object type reconciled"
            );
            objects.push(outcome);
            if let Err(err) = result {
                error!(%object_type, error = %err, "aborting migration run");
                failure = Some(err);
                break;
            }
        }

        run.finished_at = Some(Utc::now());
        match &failure {
            None => run.status = RunStatus::Completed,
            Some(err) => {
                run.status = RunStatus::Failed;
                run.error_message = Some(err.to_string());
            }
        }
        let finalized = self.store.finalize_run(&run).await;
        if let Err(err) = &finalized {
            error!(error = %err, "could not finalize migration run");
        }
        info!(
            status = run.status.as_str(),
            matched = run.totals.matched,
            created = run.totals.created,
            updated = run.totals.updated,
            skipped = run.totals.skipped,
            errors = run.totals.errors,
            "migration run finished"
        );

        let run_id = run.id;
        let outcome = RunOutcome { run, objects };
        match (failure, finalized) {
            (None, Ok(())) => Ok(outcome),
            (Some(source), _) => Err(RunFailed {
                run_id,
                outcome: Box::new(outcome),
                source,
            }),
            (None, Err(err)) => Err(RunFailed {
                run_id,
                outcome: Box::new(outcome),
                source: err.into(),
            }),
        }
    }
}
