use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::IngestError,
    record::{DEFAULT_MACHINE, OkPolicy, SentinelPolicy},
    schema::{DEFAULT_TABLE, is_valid_identifier},
    store::DatabaseTarget,
    upsert::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE},
    walker::LayoutConfig,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub ok_policy: OkPolicy,
    #[serde(flatten)]
    pub sentinels: SentinelPolicy,
}

/// Everything one ingestion run needs. Every field has a default so a config
/// file only has to name what differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub root: PathBuf,
    pub table: String,
    pub machine: String,
    pub batch_size: usize,
    pub workers: usize,
    pub deadline_secs: Option<u64>,
    pub dry_run: bool,
    /// Year stamped on filenames that omit it; defaults to the current year.
    pub reference_year: Option<i32>,
    pub database: Option<DatabaseTarget>,
    pub layout: LayoutConfig,
    pub normalization: NormalizationConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            table: DEFAULT_TABLE.to_string(),
            machine: DEFAULT_MACHINE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: default_workers(),
            deadline_secs: None,
            dry_run: false,
            reference_year: None,
            database: None,
            layout: LayoutConfig::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading configuration from {path:?}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing configuration {path:?}"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_yaml()?)
            .with_context(|| format!("Writing configuration to {path:?}"))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing configuration")
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.root.as_os_str().is_empty() {
            return Err(IngestError::Config("root directory is not set".into()));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(IngestError::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if !is_valid_identifier(&self.table) {
            return Err(IngestError::Config(format!(
                "table '{}' is not a plain SQL identifier",
                self.table
            )));
        }
        if self.machine.trim().is_empty() {
            return Err(IngestError::Config("machine tag must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(IngestError::Config("workers must be at least 1".into()));
        }
        if !self.dry_run && self.database.is_none() {
            return Err(IngestError::Config(
                "no database configured (set `database` or pass --database-url)".into(),
            ));
        }
        Ok(())
    }
}
