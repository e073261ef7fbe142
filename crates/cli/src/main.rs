use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medata_core::snapshot::write_snapshot;
use medata_core::storage::export_key;
use medata_core::{
    open_store, FixtureSet, HarnessConfig, MedicalStore, MemoryStore, Namespace, ObjectStorage,
    PgStore, StoreBackend, Table,
};
use medata_suite::{run_suite, Group, SuiteEnv};

#[derive(Parser)]
#[command(name = "medata")]
#[command(about = "Contract test harness for the medical-data API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run case groups against the configured API
    Run {
        /// Case group to run (repeatable; default: all)
        #[arg(long = "group", value_parser = parse_group)]
        groups: Vec<Group>,
        /// Write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Override WORKERS
        #[arg(long)]
        workers: Option<usize>,
        /// Serve the reference API in-process over an in-memory store and test that
        #[arg(long)]
        local: bool,
    },
    /// Install the standard fixture set
    Seed {
        /// Namespace such as TEST_1a2b3c4d_ (generated when omitted)
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Remove every row under a fixture namespace
    Cleanup {
        /// Namespace printed by `seed`
        #[arg(long)]
        namespace: String,
    },
    /// Manage the medate_exam schema
    Schema {
        #[command(subcommand)]
        action: SchemaCommand,
    },
    /// Export every table to parquet/<table>/<table>.parquet
    Export,
    /// Probe database and object storage reachability
    Check,
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Create the schema and tables if missing
    Apply,
    /// Print the live column layout of a table
    Show {
        /// patient_information, lab_tests, lab_results or admissions
        table: String,
    },
}

fn parse_group(s: &str) -> Result<Group, String> {
    s.parse::<Group>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medata=info".parse()?)
                .add_directive("medata_core=info".parse()?)
                .add_directive("medata_suite=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = HarnessConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Some(Commands::Run {
            groups,
            report,
            workers,
            local,
        }) => {
            let success = run(config, groups, report, workers, local).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Some(Commands::Seed { namespace }) => {
            let namespace = match namespace {
                Some(ns) => Namespace::parse(&ns)?,
                None => Namespace::generate(),
            };
            let store = open_store(&config)?;
            let set = FixtureSet::standard(&namespace)?;
            let ids = store.insert_fixtures(&set).await?;
            println!(
                "Seeded {} rows under {namespace} (lab result ids {:?})",
                set.row_count(),
                ids
            );
        }
        Some(Commands::Cleanup { namespace }) => {
            let namespace = Namespace::parse(&namespace)?;
            let store = open_store(&config)?;
            let removed = store.remove_namespace(&namespace).await?;
            println!("Removed {removed} rows under {namespace}");
        }
        Some(Commands::Schema { action }) => schema(&config, action).await?,
        Some(Commands::Export) => export(&config).await?,
        Some(Commands::Check) => check(&config).await?,
        None => {
            println!("Use 'medata --help' for commands");
        }
    }

    Ok(())
}

async fn run(
    mut config: HarnessConfig,
    groups: Vec<Group>,
    report_path: Option<PathBuf>,
    workers: Option<usize>,
    local: bool,
) -> anyhow::Result<bool> {
    if let Some(workers) = workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.runner.workers = workers;
    }

    let storage = ObjectStorage::from_settings(&config.storage)?;
    let store: Arc<dyn MedicalStore> = if local {
        let store: Arc<dyn MedicalStore> = Arc::new(MemoryStore::new());
        let state = api_rest::ApiState::new(Arc::clone(&store), &config.api.api_key);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, api_rest::router(state)).await {
                tracing::error!("Local API stopped: {e}");
            }
        });
        tracing::info!("-- Serving the reference API on http://{addr}");
        config.api.base_url = format!("http://{addr}");
        config.store = StoreBackend::Memory;
        store
    } else {
        if config.store == StoreBackend::Memory {
            tracing::warn!(
                "STORE_BACKEND=memory against an external API: fixtures are invisible to it and fixture cases will fail"
            );
        }
        open_store(&config)?
    };

    config.log_summary();
    let env = Arc::new(SuiteEnv::new(config, store, storage)?);
    let report = run_suite(env, &groups).await;

    println!("{report}");
    if let Some(path) = report_path {
        tokio::fs::write(&path, report.to_json()?)
            .await
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }
    Ok(report.is_success())
}

async fn schema(config: &HarnessConfig, action: SchemaCommand) -> anyhow::Result<()> {
    anyhow::ensure!(
        config.store == StoreBackend::Postgres,
        "schema commands need STORE_BACKEND=postgres"
    );
    let store = PgStore::connect(&config.postgres).await?;
    match action {
        SchemaCommand::Apply => {
            store.apply_schema().await?;
            println!("Schema {} is up to date", store.schema());
        }
        SchemaCommand::Show { table } => {
            let table: Table = table.parse()?;
            let columns = store
                .column_types(table)
                .await?
                .with_context(|| format!("no catalogue for {table}"))?;
            anyhow::ensure!(!columns.is_empty(), "table {}.{table} does not exist", store.schema());
            println!("{}", serde_json::to_string_pretty(&columns)?);
        }
    }
    Ok(())
}

async fn export(config: &HarnessConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let storage = ObjectStorage::from_settings(&config.storage)?;
    for table in Table::INSERT_ORDER {
        let rows = store.rows(table, "").await?;
        let key = export_key(table);
        let size = write_snapshot(&storage, &key, table, &rows).await?;
        println!("{table}: {} rows -> s3://{}/{key} ({size} bytes)", rows.len(), storage.bucket());
    }
    Ok(())
}

async fn check(config: &HarnessConfig) -> anyhow::Result<()> {
    config.log_summary();
    let store = open_store(config)?;
    let storage = ObjectStorage::from_settings(&config.storage)?;

    let database = store.ping().await;
    let bucket = storage.check_access().await;
    match &database {
        Ok(()) => println!("database: ok ({:?})", store.backend()),
        Err(e) => println!("database: FAILED ({e})"),
    }
    match &bucket {
        Ok(()) => println!("object storage: ok ({})", storage.bucket()),
        Err(e) => println!("object storage: FAILED ({e})"),
    }
    database?;
    bucket?;
    Ok(())
}
