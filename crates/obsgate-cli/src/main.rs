//! Headless gateway CLI, grounded on the teacher's `tandem-engine` binary
//! (`engine/src/main.rs`): a `clap` derive `Cli` with one subcommand per
//! process mode, wired against the same component constructors the HTTP
//! server uses.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use obsgate_config::ConfigStore;
use obsgate_costguard::CostGuard;
use obsgate_etl::{normalize_batch, InMemoryDeadLetterSink, RawSourceRow, SourceTableKind};
use obsgate_observability::{init_process_logging, ProcessKind};
use obsgate_providers::{FakeProvider, Provider};
use obsgate_server::AppState;
use obsgate_store::SessionStore;
use obsgate_tools::{
    DryRunTool, FactStore, FactStoreEstimator, LogAggregateTool, LogSearchTool, SimilarErrorsTool,
    Tool, ToolRegistry, TraceLookupTool,
};
use obsgate_vector::{Embedder, HashEmbedder, VectorStore};
use serde::Deserialize;

const DEFAULT_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "obsgate")]
#[command(about = "Log observability gateway: HTTP API, batch ETL, health probe")]
struct Cli {
    #[arg(long, env = "OBSGATE_STATE_DIR", default_value = ".obsgate")]
    state_dir: PathBuf,
    #[arg(long, env = "OBSGATE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Starts the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Normalizes a batch of raw source rows into the fact store.
    Etl {
        /// Path to a JSON Lines file of raw source records.
        #[arg(long)]
        input: PathBuf,
    },
    /// Dependency reachability check; exits non-zero if anything is down.
    Health,
}

/// Exit codes per `spec.md` §6: 0 success, 2 config/validation error, 3
/// external-dependency error, 4 partial failure, 1 unexpected.
#[derive(Debug)]
enum CliError {
    Config(String),
    Dependency(String),
    Partial(String),
    Unexpected(anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Dependency(_) => 3,
            CliError::Partial(_) => 4,
            CliError::Unexpected(_) => 1,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "config error: {msg}"),
            CliError::Dependency(msg) => write!(f, "dependency error: {msg}"),
            CliError::Partial(msg) => write!(f, "partial failure: {msg}"),
            CliError::Unexpected(err) => write!(f, "unexpected error: {err}"),
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Unexpected(err)
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let logs_dir = obsgate_observability::canonical_logs_dir_from_root(&cli.state_dir);
    let _guard = match init_process_logging(ProcessKind::Cli, &logs_dir, DEFAULT_RETENTION_DAYS) {
        Ok((guard, _info)) => Some(guard),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            None
        }
    };

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "obsgate exiting with error");
            eprintln!("error: {err}");
            std::process::ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    std::fs::create_dir_all(&cli.state_dir)
        .map_err(|err| CliError::Config(format!("cannot create state dir: {err}")))?;

    let config_store = ConfigStore::load(cli.config.as_deref())
        .map_err(|err| CliError::Config(err.to_string()))?;
    let config = Arc::new(config_store.get().clone());

    match cli.command {
        Commands::Serve { host, port } => serve(&cli.state_dir, config, &host, port).await,
        Commands::Etl { input } => etl(&cli.state_dir, &input).await,
        Commands::Health => health(&cli.state_dir).await,
    }
}

async fn serve(
    state_dir: &Path,
    config: Arc<obsgate_config::GatewayConfig>,
    host: &str,
    port: u16,
) -> Result<(), CliError> {
    let session_store = SessionStore::open(&state_dir.join("sessions.sqlite"))
        .await
        .map_err(|err| CliError::Dependency(format!("session store: {err}")))?;
    let fact_store = FactStore::open(&state_dir.join("facts.sqlite"))
        .await
        .map_err(|err| CliError::Dependency(format!("fact store: {err}")))?;
    let vector_store = VectorStore::open(&state_dir.join("vectors.sqlite"), 384)
        .await
        .map_err(|err| CliError::Dependency(format!("vector store: {err}")))?;

    let cost_guard = Arc::new(CostGuard::with_ceiling(
        FactStoreEstimator::new(fact_store.clone()),
        config.max_bytes_scanned,
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(LogSearchTool {
            store: fact_store.clone(),
            cost_guard: cost_guard.clone(),
        }),
        Arc::new(LogAggregateTool {
            store: fact_store.clone(),
            cost_guard: cost_guard.clone(),
        }),
        Arc::new(TraceLookupTool {
            store: fact_store.clone(),
        }),
        Arc::new(SimilarErrorsTool {
            store: fact_store.clone(),
            vector: vector_store.clone(),
            embedder,
        }),
        Arc::new(DryRunTool {
            cost_guard: cost_guard.clone(),
        }),
    ];

    let provider: Arc<dyn Provider> = Arc::new(FakeProvider {
        canned_answer: "No planner provider is configured; this is a placeholder answer."
            .to_string(),
    });

    let state = AppState::new(
        session_store,
        fact_store,
        vector_store,
        ToolRegistry::new(tools),
        cost_guard,
        provider,
        config,
    );

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|err| CliError::Config(format!("invalid host/port: {err}")))?;

    obsgate_server::serve(addr, state)
        .await
        .map_err(CliError::Unexpected)
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    table: String,
    native_id: Option<String>,
    timestamp: String,
    payload: serde_json::Value,
}

/// Reads newline-delimited raw records, normalizes them per source table,
/// and inserts the canonical rows into the fact store. Exits with a
/// partial-failure code if any record was dead-lettered.
async fn etl(state_dir: &Path, input: &Path) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(input)
        .map_err(|err| CliError::Config(format!("cannot read {}: {err}", input.display())))?;

    let mut rows_by_table: std::collections::HashMap<SourceTableKind, Vec<RawSourceRow>> =
        std::collections::HashMap::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(line)
            .map_err(|err| CliError::Config(format!("line {}: {err}", line_no + 1)))?;
        let table = SourceTableKind::from_table_name(&record.table)
            .ok_or_else(|| CliError::Config(format!("line {}: unknown table `{}`", line_no + 1, record.table)))?;
        rows_by_table.entry(table).or_default().push(RawSourceRow {
            table,
            native_id: record.native_id,
            timestamp: record.timestamp,
            payload: record.payload,
        });
    }

    let fact_store = FactStore::open(&state_dir.join("facts.sqlite"))
        .await
        .map_err(|err| CliError::Dependency(format!("fact store: {err}")))?;

    let mut total_in = 0u64;
    let mut total_out = 0u64;
    let mut total_dead_lettered = 0u64;
    let mut dead_letters = InMemoryDeadLetterSink::default();

    for (table, rows) in rows_by_table {
        let (normalized, report) = normalize_batch(
            &rows,
            &mut dead_letters,
            obsgate_etl::DEFAULT_ERROR_THRESHOLD_PCT,
        );
        total_in += report.rows_in;
        total_out += report.rows_out;
        total_dead_lettered += report.rows_dead_lettered;
        for row in &normalized {
            fact_store
                .insert(row)
                .await
                .map_err(|err| CliError::Dependency(format!("fact store insert: {err}")))?;
        }
        tracing::info!(
            table = table.table_name(),
            rows_in = report.rows_in,
            rows_out = report.rows_out,
            rows_dead_lettered = report.rows_dead_lettered,
            aborted = report.aborted,
            "normalized batch"
        );
    }

    println!(
        "ingested {total_out}/{total_in} rows ({total_dead_lettered} dead-lettered) into {}",
        state_dir.join("facts.sqlite").display()
    );

    if total_dead_lettered > 0 {
        return Err(CliError::Partial(format!(
            "{total_dead_lettered} of {total_in} rows were dead-lettered"
        )));
    }
    Ok(())
}

async fn health(state_dir: &Path) -> Result<(), CliError> {
    let session_store = SessionStore::open(&state_dir.join("sessions.sqlite"))
        .await
        .map_err(|err| CliError::Dependency(format!("session store: {err}")))?;
    let fact_store = FactStore::open(&state_dir.join("facts.sqlite"))
        .await
        .map_err(|err| CliError::Dependency(format!("fact store: {err}")))?;

    session_store
        .list_sessions(None)
        .await
        .map_err(|err| CliError::Dependency(format!("session store unreachable: {err}")))?;
    fact_store
        .trace_lookup("__health_check__")
        .await
        .map_err(|err| CliError::Dependency(format!("fact store unreachable: {err}")))?;

    println!("ok: session store and fact store are reachable under {}", state_dir.display());
    Ok(())
}
