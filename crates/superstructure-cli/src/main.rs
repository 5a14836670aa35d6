use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use superstructure_core::{
    all_activities_found, all_flows_found, complete_batch, fill_out_with_fields,
    fill_out_with_keys, side_columns, Column, ExchangeRecord, ExchangeTable, ReconcileConfig,
    RegistryRecord, Side,
};
use superstructure_store_sqlite::SqliteRegistry;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ssx")]
#[command(about = "Superstructure exchange reconciliation CLI")]
struct Cli {
    #[arg(long, default_value = "./superstructure.sqlite3")]
    db: PathBuf,

    /// YAML reconciliation config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Registry {
        #[command(subcommand)]
        command: Box<RegistryCommand>,
    },
    Exchanges {
        #[command(subcommand)]
        command: Box<ExchangesCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum RegistryCommand {
    Import(RegistryImportArgs),
    List,
}

#[derive(Debug, Args)]
struct RegistryImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ExchangesCommand {
    /// Report whether every row has a registry counterpart.
    Check(ExchangesCheckArgs),
    /// Resolve missing keys from descriptive fields.
    ResolveKeys(ExchangesRewriteArgs),
    /// Rewrite descriptive fields from keys.
    FillFields(ExchangesRewriteArgs),
    /// Resolve missing keys, then rewrite every field from its key.
    Complete(ExchangesRewriteArgs),
    /// Print the named columns of every row; all endpoint columns by default.
    Select(ExchangesSelectArgs),
}

#[derive(Debug, Args)]
struct ExchangesCheckArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct ExchangesSelectArgs {
    #[arg(long = "in")]
    input: PathBuf,
    /// Column header such as `from key`; repeat for several.
    #[arg(long = "column")]
    columns: Vec<String>,
}

#[derive(Debug, Args)]
struct ExchangesRewriteArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ReconcileConfig> {
    let config = match path {
        Some(path) => ReconcileConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ReconcileConfig::default(),
    };
    config.validate().context("invalid reconciliation config")?;
    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut registry = SqliteRegistry::open(&cli.db)?;
    match cli.command {
        Command::Registry { command } => run_registry(*command, &mut registry),
        Command::Exchanges { command } => {
            let config = load_config(cli.config.as_deref())?;
            registry.migrate()?;
            run_exchanges(*command, &registry, &config)
        }
    }
}

fn run_registry(command: RegistryCommand, registry: &mut SqliteRegistry) -> Result<()> {
    match command {
        RegistryCommand::Import(args) => {
            let summary = registry.import_ndjson(&args.input)?;
            emit_json(serde_json::json!({
                "in": args.input.display().to_string(),
                "summary": summary,
                "activity_count": registry.activity_count()?
            }))
        }
        RegistryCommand::List => {
            registry.migrate()?;
            let records: Vec<RegistryRecord> = registry.list_activities()?;
            emit_json(serde_json::json!({
                "count": records.len(),
                "activities": records
            }))
        }
    }
}

fn run_exchanges(
    command: ExchangesCommand,
    registry: &SqliteRegistry,
    config: &ReconcileConfig,
) -> Result<()> {
    match command {
        ExchangesCommand::Check(args) => {
            let table = read_exchange_file(&args.input, config)?;
            let mut sides = serde_json::Map::new();
            let mut all_found = true;
            for side in Side::ALL {
                let activities = all_activities_found(registry, &table, side, config)?;
                let flows = all_flows_found(registry, &table, side, config)?;
                all_found &= activities && flows;
                sides.insert(
                    side.as_str().to_string(),
                    serde_json::json!({
                        "technosphere": activities,
                        "biosphere": flows
                    }),
                );
            }
            emit_json(serde_json::json!({
                "rows": table.len(),
                "sides": sides,
                "all_found": all_found
            }))
        }
        ExchangesCommand::ResolveKeys(args) => {
            let mut table = read_exchange_file(&args.input, config)?;
            let report = fill_out_with_fields(registry, &mut table, config)?;
            let written = write_exchange_file(&args.out, &table)?;
            emit_rewrite(&args, written, Some(serde_json::to_value(report)?))
        }
        ExchangesCommand::FillFields(args) => {
            let mut table = read_exchange_file(&args.input, config)?;
            fill_out_with_keys(registry, &mut table)?;
            let written = write_exchange_file(&args.out, &table)?;
            emit_rewrite(&args, written, None)
        }
        ExchangesCommand::Complete(args) => {
            let mut table = read_exchange_file(&args.input, config)?;
            let report = complete_batch(registry, &mut table, config)?;
            let written = write_exchange_file(&args.out, &table)?;
            emit_rewrite(&args, written, Some(serde_json::to_value(report)?))
        }
        ExchangesCommand::Select(args) => {
            let table = read_exchange_file(&args.input, config)?;
            let columns = parse_columns(&args.columns)?;
            let values = columns
                .iter()
                .map(|column| serde_json::to_value(table.column(*column)))
                .collect::<Result<Vec<_>, _>>()?;
            let rows: Vec<Value> = (0..table.len())
                .map(|index| {
                    Value::Array(
                        values
                            .iter()
                            .map(|column| column.get(index).cloned().unwrap_or(Value::Null))
                            .collect(),
                    )
                })
                .collect();
            emit_json(serde_json::json!({
                "columns": columns.iter().map(|column| column.name()).collect::<Vec<_>>(),
                "rows": rows
            }))
        }
    }
}

fn parse_columns(names: &[String]) -> Result<Vec<Column>> {
    if names.is_empty() {
        return Ok(Side::ALL.into_iter().flat_map(side_columns).collect());
    }
    names
        .iter()
        .map(|name| Column::parse(name).ok_or_else(|| anyhow::anyhow!("unknown column `{name}`")))
        .collect()
}

fn emit_rewrite(args: &ExchangesRewriteArgs, written: usize, report: Option<Value>) -> Result<()> {
    emit_json(serde_json::json!({
        "in": args.input.display().to_string(),
        "out": args.out.display().to_string(),
        "rows": written,
        "report": report
    }))
}

/// Read an NDJSON exchange file, one row object per line.
fn read_exchange_file(path: &Path, config: &ReconcileConfig) -> Result<ExchangeTable> {
    let file = File::open(path)
        .with_context(|| format!("failed to open exchange file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row: ExchangeRecord = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse exchange row {} from {}", index + 1, path.display())
        })?;
        rows.push(row);
    }

    let mut table = ExchangeTable::new(rows);
    table.normalize_missing(config);
    debug!(rows = table.len(), path = %path.display(), "read exchange file");
    Ok(table)
}

fn write_exchange_file(path: &Path, table: &ExchangeTable) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create parent directory for {}", path.display())
        })?;
    }

    let file = File::create(path)
        .with_context(|| format!("failed to create exchange file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in table.rows() {
        serde_json::to_writer(&mut writer, row).context("failed to serialize exchange row")?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write exchange file {}", path.display()))?;
    }
    writer.flush().with_context(|| format!("failed to flush exchange file {}", path.display()))?;

    Ok(table.len())
}
