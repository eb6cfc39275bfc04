pub mod cli;
pub mod config;
pub mod context;
pub mod csv_ingest;
pub mod error;
pub mod export;
pub mod filename;
pub mod io_utils;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod store;
pub mod table;
pub mod upsert;
pub mod walker;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, error, info};

use crate::{
    cli::{Cli, Commands, ConfigOverrides},
    config::IngestConfig,
    context::IngestionContext,
    filename::FilenameMetadataExtractor,
    pipeline::{IngestionOrchestrator, RunSummary},
    record::{MeasurementRecord, RecordMapper},
    store::DatabaseTarget,
    walker::{DirectoryWalker, SourceFile},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("gompc_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&args),
        Commands::Scan(args) => handle_scan(&args),
        Commands::Parse(args) => handle_parse(&args),
        Commands::Schema(args) => handle_schema(&args),
        Commands::Config(args) => handle_config(&args),
    }
}

/// Configuration file (or defaults) with command-line overrides applied.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<IngestConfig> {
    let mut config = match &overrides.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    if let Some(root) = &overrides.root {
        config.root = root.clone();
    }
    if let Some(url) = &overrides.database_url {
        let target = DatabaseTarget::parse_url(url)
            .context("Parsing --database-url")?;
        config.database = Some(target);
    }
    if let Some(table) = &overrides.table {
        config.table = table.clone();
    }
    if let Some(batch_size) = overrides.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(workers) = overrides.workers {
        config.workers = workers;
    }
    if let Some(deadline) = overrides.deadline_secs {
        config.deadline_secs = Some(deadline);
    }
    if let Some(year) = overrides.reference_year {
        config.reference_year = Some(year);
    }
    debug!("Effective configuration: {config:?}");
    Ok(config)
}

fn handle_ingest(args: &cli::IngestArgs) -> Result<()> {
    let mut config = resolve_config(&args.overrides)?;
    config.dry_run |= args.dry_run;
    let orchestrator =
        IngestionOrchestrator::new(config).context("Validating ingestion configuration")?;

    let summary = match &args.export {
        Some(path) => {
            let encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
            let mut ctx = IngestionContext::new();
            match orchestrator.collect(&mut ctx) {
                Ok(dataset) => {
                    let written =
                        export::write_records(Some(path.as_path()), &dataset.records, encoding)
                            .with_context(|| format!("Exporting dataset to {path:?}"))?;
                    info!("Exported {written} record(s) to {path:?}");
                    orchestrator.persist(ctx, &dataset, || match &orchestrator.config().database {
                        Some(target) => target.connect(),
                        None => Err(error::StoreError::UnsupportedTarget(
                            "no database configured".into(),
                        )),
                    })
                }
                Err(err) => {
                    error!("[{}] {}", ctx.tag(), err.report());
                    RunSummary::from_context(&ctx, orchestrator.config().dry_run, Some(&err), None)
                }
            }
        }
        None => orchestrator.run(),
    };

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("Serializing run summary")?;
        println!("{rendered}");
    } else {
        print_summary(&summary);
    }

    if summary.success {
        Ok(())
    } else {
        Err(anyhow!(
            "Ingestion run {} failed: {}",
            summary.run_id,
            summary.errors.first().map(String::as_str).unwrap_or("unknown error")
        ))
    }
}

fn print_summary(summary: &RunSummary) {
    let headers = vec!["metric".to_string(), "value".to_string()];
    let mut rows = vec![
        vec!["run_id".to_string(), summary.run_id.clone()],
        vec!["success".to_string(), summary.success.to_string()],
        vec!["dry_run".to_string(), summary.dry_run.to_string()],
        vec!["files_discovered".to_string(), summary.files_discovered.to_string()],
        vec!["csv_files_processed".to_string(), summary.csv_files_processed.to_string()],
        vec!["files_failed".to_string(), summary.files_failed.to_string()],
        vec!["rows_read".to_string(), summary.rows_read.to_string()],
        vec!["rows_normalized".to_string(), summary.rows_normalized.to_string()],
        vec!["numeric_defaults".to_string(), summary.numeric_defaults.to_string()],
        vec!["rows_deduplicated".to_string(), summary.rows_deduplicated.to_string()],
        vec!["records_inserted".to_string(), summary.records_inserted.to_string()],
        vec!["rows_skipped".to_string(), summary.rows_skipped.to_string()],
        vec!["duration_seconds".to_string(), format!("{:.3}", summary.duration_seconds)],
    ];
    if let Some(count) = summary.table_rows_after {
        rows.push(vec!["table_rows_after".to_string(), count.to_string()]);
    }
    table::print_table(&headers, &rows);
    for message in &summary.errors {
        println!("error: {message}");
    }
}

fn handle_scan(args: &cli::ScanArgs) -> Result<()> {
    let mut config = resolve_config(&args.overrides)?;
    config.dry_run = true;
    let orchestrator =
        IngestionOrchestrator::new(config).context("Validating scan configuration")?;
    let mut ctx = IngestionContext::new();
    let files = orchestrator.discover(&mut ctx)?;

    let headers = ["client", "layout", "reference", "phase", "lot", "timestamp", "file"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = files
        .iter()
        .map(|file| {
            vec![
                file.source.client.clone(),
                file.source.strategy.as_str().to_string(),
                file.source.reference.clone(),
                file.source.phase.clone().unwrap_or_default(),
                file.metadata.lot.clone(),
                file.metadata.timestamp.format(store::TIMESTAMP_FORMAT).to_string(),
                file.source.file_name(),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    info!(
        "{} file(s) discovered, {} warning(s)",
        files.len(),
        ctx.issues().len()
    );
    Ok(())
}

const PARSE_COLUMNS: &[&str] = &[
    "id_referencia_some",
    "id_element",
    "nominal",
    "actual",
    "tolerancia_negativa",
    "tolerancia_positiva",
    "desviacio",
    "ok",
];

fn handle_parse(args: &cli::ParseArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::default(),
    };
    let extractor = match config.reference_year {
        Some(year) => FilenameMetadataExtractor::with_reference_year(year),
        None => FilenameMetadataExtractor::new(),
    };
    let source = SourceFile {
        path: args.input.clone(),
        client: args.client.clone(),
        reference: args.reference.clone(),
        phase: None,
        rivet_type: None,
        cavity: None,
        strategy: DirectoryWalker::Standard,
    };
    let metadata = extractor.extract(&source.file_name());
    info!(
        "Lot '{}' at {} ({:?} pattern)",
        metadata.lot, metadata.timestamp, metadata.pattern
    );
    let rows = csv_ingest::ingest(&source, metadata)
        .with_context(|| format!("Parsing {:?}", args.input))?;
    info!(
        "Decoded as {} with separator {:?}; {} row(s)",
        rows.table.encoding.label(),
        rows.table.delimiter as char,
        rows.len()
    );

    let mapper = RecordMapper::new(
        config.machine.clone(),
        config.normalization.ok_policy,
        config.normalization.sentinels,
        chrono::Local::now().naive_local(),
    );
    let mapped = mapper.map(&rows);
    let limit = if args.limit == 0 {
        mapped.records.len()
    } else {
        args.limit
    };
    let headers = PARSE_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    let table_rows = mapped
        .records
        .iter()
        .take(limit)
        .map(parse_row)
        .collect::<Vec<_>>();
    table::print_table(&headers, &table_rows);
    info!(
        "{} record(s), {} numeric cell(s) defaulted",
        mapped.records.len(),
        mapped.numeric_defaults
    );
    Ok(())
}

fn parse_row(record: &MeasurementRecord) -> Vec<String> {
    PARSE_COLUMNS
        .iter()
        .map(|column| {
            record
                .column_value(column)
                .map(|value| value.render())
                .unwrap_or_default()
        })
        .collect()
}

fn handle_schema(args: &cli::SchemaArgs) -> Result<()> {
    let table = args.table.as_deref().unwrap_or(schema::DEFAULT_TABLE);
    if !schema::is_valid_identifier(table) {
        return Err(anyhow!("Table '{table}' is not a plain SQL identifier"));
    }
    for statement in schema::ddl(args.dialect.into(), table) {
        println!("{statement};");
    }
    Ok(())
}

fn handle_config(args: &cli::ConfigArgs) -> Result<()> {
    let config = resolve_config(&args.overrides)?;
    match &args.output {
        Some(path) => {
            config.save(path)?;
            info!("Configuration written to {path:?}");
        }
        None => print!("{}", config.to_yaml()?),
    }
    Ok(())
}
