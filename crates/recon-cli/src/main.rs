use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use recon_adapters::{
    EnvSecretsProvider, FixtureSource, HttpFetcher, SalesforceConfig, SalesforceSource,
    SourceReader,
};
use recon_core::{parse_object_list, ObjectType};
use recon_storage::{Datastore, MemoryStore, PgStore};
use recon_sync::validation::IssueKind;
use recon_sync::{
    MigrationOrchestrator, ReconcilerRegistry, ReportWriter, RunOptions, RunReport, SyncConfig,
    Validator,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Salesforce,
    Fixtures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Parser)]
#[command(name = "recon-cli")]
#[command(about = "Reconcile a CRM export into the internal datastore")]
struct Cli {
    /// Match and report without writing records, mappings or orphans.
    #[arg(long)]
    dry_run: bool,
    /// Run the integrity checks only.
    #[arg(long, conflicts_with = "report_only")]
    validate_only: bool,
    /// Write the coverage report only.
    #[arg(long)]
    report_only: bool,
    /// Comma-separated object types, e.g. `account,contact,work_order`.
    #[arg(long)]
    objects: Option<String>,
    #[arg(long, value_enum, default_value_t = SourceKind::Salesforce)]
    source: SourceKind,
    #[arg(long)]
    fixtures_dir: Option<PathBuf>,
    /// Defaults to postgres when DATABASE_URL is set.
    #[arg(long, value_enum)]
    store: Option<StoreKind>,
    /// YAML overrides for matching thresholds, batch size and object list.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    reports_dir: Option<PathBuf>,
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = SyncConfig::from_env();
    if let Some(dir) = &cli.fixtures_dir {
        config.fixtures_dir = dir.clone();
    }
    if let Some(dir) = &cli.reports_dir {
        config.reports_dir = dir.clone();
    }
    if let Some(path) = &cli.config {
        config.settings_path = Some(path.clone());
    }
    let settings = config.reconcile_settings()?;
    let requested = match &cli.objects {
        Some(list) => parse_object_list(list)?,
        None => Vec::new(),
    };

    let store = open_store(&config, cli.store).await?;

    if cli.validate_only || cli.report_only {
        let types = if requested.is_empty() {
            settings.objects.clone()
        } else {
            requested
        };
        return check_store(store.as_ref(), &types, &config, cli.report_only).await;
    }

    let source = open_source(&config, cli.source, settings.batch_size)?;
    let registry = ReconcilerRegistry::standard(&settings)?;
    let orchestrator = MigrationOrchestrator::new(store, source, registry, settings);
    let options = RunOptions {
        dry_run: cli.dry_run,
        object_types: requested,
    };

    let (outcome, failure) = match orchestrator.run(&options).await {
        Ok(outcome) => (outcome, None),
        Err(failed) => (*failed.outcome, Some(failed.source)),
    };
    let report = RunReport::from_outcome(&outcome);
    let run_dir = ReportWriter::new(&config.reports_dir).write(&report).await?;

    println!("{}", report.to_markdown());
    println!(
        "run complete: run_id={} status={} created={} updated={} errors={} review={} reports={}",
        report.run_id,
        report.status.as_str(),
        report.totals.created,
        report.totals.updated,
        report.totals.errors,
        report.review_queue.len(),
        run_dir.display()
    );

    match failure {
        None => Ok(()),
        Some(err) => Err(anyhow::Error::new(err).context(format!("migration run {} failed", report.run_id))),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recon=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &SyncConfig, kind: Option<StoreKind>) -> Result<Arc<dyn Datastore>> {
    let kind = kind.unwrap_or(if config.database_url.is_some() {
        StoreKind::Postgres
    } else {
        StoreKind::Memory
    });
    match kind {
        StoreKind::Memory => {
            info!("using in-memory datastore");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for --store postgres")?;
            let store = PgStore::connect(url).await.context("connecting to postgres")?;
            store.migrate().await.context("applying datastore migrations")?;
            Ok(Arc::new(store))
        }
    }
}

/// Fixture pages follow the reconcile batch size.
fn open_source(config: &SyncConfig, kind: SourceKind, page_size: usize) -> Result<Arc<dyn SourceReader>> {
    match kind {
        SourceKind::Fixtures => {
            info!(dir = %config.fixtures_dir.display(), "reading fixture export");
            Ok(Arc::new(FixtureSource::new(&config.fixtures_dir, page_size)))
        }
        SourceKind::Salesforce => {
            let http = HttpFetcher::new(config.http_client_config())?;
            let source = SalesforceSource::new(
                SalesforceConfig {
                    login_url: config.salesforce_login_url.clone(),
                    api_version: config.salesforce_api_version.clone(),
                },
                http,
                &EnvSecretsProvider::with_prefix("SALESFORCE_"),
            )
            .context("resolving salesforce credentials")?;
            Ok(Arc::new(source))
        }
    }
}

async fn check_store(
    store: &dyn Datastore,
    types: &[ObjectType],
    config: &SyncConfig,
    coverage_only: bool,
) -> Result<()> {
    let (report, file_name) = if coverage_only {
        (Validator::coverage(store, types).await, "coverage.md")
    } else {
        (Validator::run(store, types).await, "validation.md")
    };
    let markdown = report.to_markdown();
    tokio::fs::create_dir_all(&config.reports_dir)
        .await
        .with_context(|| format!("creating {}", config.reports_dir.display()))?;
    let path = config.reports_dir.join(file_name);
    tokio::fs::write(&path, &markdown)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("{markdown}");

    let unavailable = report.count(IssueKind::StoreUnavailable);
    if unavailable > 0 {
        anyhow::bail!("datastore unavailable for {unavailable} object type(s)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::SourceQuery;

    #[tokio::test]
    async fn fixture_pages_use_the_batch_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("Account.json"),
            r#"[{"Id":"0010","Name":"A"},{"Id":"0011","Name":"B"},{"Id":"0012","Name":"C"}]"#,
        )
        .unwrap();
        let mut config = SyncConfig::from_env();
        config.fixtures_dir = dir.path().to_path_buf();

        let source = open_source(&config, SourceKind::Fixtures, 2).unwrap();
        let query = SourceQuery::new(ObjectType::Account, &["Name"]);
        let page = source.fetch_page(&query, None).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.next.is_some());
    }
}
