use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::store::Dialect;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest GOMPC/CMM quality-measurement CSV exports into an SPC database",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Discover, normalize and upsert every export under a root directory
    Ingest(IngestArgs),
    /// List the files a run would ingest, with their inferred metadata
    Scan(ScanArgs),
    /// Parse and normalize a single CSV export and print its records
    Parse(ParseArgs),
    /// Print the DDL used to create the measurement table
    Schema(SchemaArgs),
    /// Print the effective configuration as YAML
    Config(ConfigArgs),
}

/// Options shared by every command that reads a configuration.
#[derive(Debug, Args, Clone, Default)]
pub struct ConfigOverrides {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Root directory of the measurement share
    #[arg(short, long)]
    pub root: Option<PathBuf>,
    /// Destination database (postgres://…, sqlite://path or sqlite::memory:)
    #[arg(long = "database-url")]
    pub database_url: Option<String>,
    /// Target table name
    #[arg(long)]
    pub table: Option<String>,
    /// Rows per upsert batch (1-50000)
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Parser threads (1 parses sequentially)
    #[arg(long)]
    pub workers: Option<usize>,
    /// Stop starting new files after this many seconds
    #[arg(long = "deadline-secs")]
    pub deadline_secs: Option<u64>,
    /// Year assumed for filenames without one
    #[arg(long = "reference-year")]
    pub reference_year: Option<i32>,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
    /// Parse and normalize only; do not connect to the database
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
    /// Also write the normalized dataset to this CSV file ('-' for stdout)
    #[arg(long)]
    pub export: Option<PathBuf>,
    /// Character encoding of the exported CSV (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Args)]
pub struct ParseArgs {
    /// CSV export to parse
    #[arg(short, long)]
    pub input: PathBuf,
    /// Client the file belongs to
    #[arg(long, default_value = "UNKNOWN")]
    pub client: String,
    /// Reference (part number) the file belongs to
    #[arg(long, default_value = "UNKNOWN")]
    pub reference: String,
    /// Maximum records to print (0 prints all)
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// YAML configuration file (normalization and machine settings)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DialectArg {
    Postgres,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// SQL dialect to print
    #[arg(long, value_enum, default_value = "postgres")]
    pub dialect: DialectArg,
    /// Target table name
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
    /// Write the configuration to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
