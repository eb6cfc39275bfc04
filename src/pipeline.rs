//! End-to-end ingestion run.
//!
//! ```text
//! walk -> filename metadata -> parse + normalize (rayon) -> accumulate
//!      -> connect -> schema sync -> batched upsert -> RunSummary
//! ```
//!
//! Only an unreadable root, an unreachable database or an invalid
//! configuration stop a run. Every other problem becomes an issue in the
//! [`IngestionContext`] and ends up in the summary's error list.

use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::IngestConfig,
    context::IngestionContext,
    csv_ingest,
    error::{IngestError, IngestionIssue, StoreError},
    filename::{FilenameMetadata, FilenameMetadataExtractor},
    record::{MappedRows, MeasurementRecord, RecordMapper, dedupe_by_key},
    schema::SchemaSynchronizer,
    store::TableStore,
    upsert::UpsertEngine,
    walker::{self, Discovered, SourceFile},
};

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredFile {
    pub source: SourceFile,
    pub metadata: FilenameMetadata,
}

/// Normalized, de-duplicated records of one run, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub files: Vec<DiscoveredFile>,
    pub records: Vec<MeasurementRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub success: bool,
    pub dry_run: bool,
    pub csv_files_processed: usize,
    pub records_inserted: usize,
    pub duration_seconds: f64,
    pub errors: Vec<String>,
    pub files_discovered: usize,
    pub files_failed: usize,
    pub rows_read: usize,
    pub rows_normalized: usize,
    pub numeric_defaults: usize,
    pub rows_deduplicated: usize,
    pub rows_skipped: usize,
    pub table_rows_after: Option<u64>,
}

impl RunSummary {
    pub(crate) fn from_context(
        ctx: &IngestionContext,
        dry_run: bool,
        fatal: Option<&IngestError>,
        table_rows_after: Option<u64>,
    ) -> Self {
        let mut errors = Vec::new();
        if let Some(err) = fatal {
            errors.push(err.report());
        }
        errors.extend(ctx.issue_messages());
        let counters = ctx.counters;
        Self {
            run_id: ctx.run_id().to_string(),
            success: fatal.is_none(),
            dry_run,
            csv_files_processed: counters.files_processed,
            records_inserted: counters.rows_upserted,
            duration_seconds: ctx.elapsed_secs(),
            errors,
            files_discovered: counters.files_discovered,
            files_failed: counters.files_failed,
            rows_read: counters.rows_read,
            rows_normalized: counters.rows_normalized,
            numeric_defaults: counters.numeric_defaults,
            rows_deduplicated: counters.rows_deduplicated,
            rows_skipped: counters.rows_skipped,
            table_rows_after,
        }
    }
}

enum FileOutcome {
    Parsed { rows_read: usize, mapped: MappedRows },
    Failed(IngestionIssue),
    Skipped,
}

pub struct IngestionOrchestrator {
    config: IngestConfig,
    extractor: FilenameMetadataExtractor,
}

impl IngestionOrchestrator {
    pub fn new(config: IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let extractor = match config.reference_year {
            Some(year) => FilenameMetadataExtractor::with_reference_year(year),
            None => FilenameMetadataExtractor::new(),
        };
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Walks the root and extracts filename metadata for every file found.
    pub fn discover(&self, ctx: &mut IngestionContext) -> Result<Vec<DiscoveredFile>, IngestError> {
        let tag = ctx.tag();
        info!("[{tag}] Scanning {:?}", self.config.root);
        let mut files = Vec::new();
        let mut current_client: Option<String> = None;
        for item in walker::walk(&self.config.root, &self.config.layout)? {
            match item {
                Discovered::Warning(issue) => ctx.record(issue),
                Discovered::File(source) => {
                    if current_client.as_deref() != Some(source.client.as_str()) {
                        info!(
                            "[{tag}] Client {} ({} layout)",
                            source.client,
                            source.strategy.as_str()
                        );
                        current_client = Some(source.client.clone());
                    }
                    let file_name = source.file_name();
                    let metadata = self.extractor.extract(&file_name);
                    if metadata.is_fallback() {
                        ctx.record(IngestionIssue::Extraction {
                            file_name,
                            lot: metadata.lot.clone(),
                        });
                    }
                    files.push(DiscoveredFile { source, metadata });
                }
            }
        }
        ctx.counters.files_discovered = files.len();
        info!("[{tag}] Discovered {} CSV file(s)", files.len());
        Ok(files)
    }

    /// Discovery, parsing and normalization; nothing touches the database.
    pub fn collect(&self, ctx: &mut IngestionContext) -> Result<Dataset, IngestError> {
        let files = self.discover(ctx)?;
        let mapper = RecordMapper::new(
            self.config.machine.clone(),
            self.config.normalization.ok_policy,
            self.config.normalization.sentinels,
            now(),
        );
        let deadline = self.config.deadline().map(|limit| Instant::now() + limit);
        let outcomes = self.parse_all(&files, &mapper, deadline, ctx);

        let tag = ctx.tag();
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (file, outcome) in files.iter().zip(outcomes) {
            match outcome {
                FileOutcome::Parsed { rows_read, mapped } => {
                    info!(
                        "[{tag}] {} -> {} row(s)",
                        file.source.path.display(),
                        mapped.records.len()
                    );
                    ctx.counters.files_processed += 1;
                    ctx.counters.rows_read += rows_read;
                    ctx.counters.numeric_defaults += mapped.numeric_defaults;
                    records.extend(mapped.records);
                }
                FileOutcome::Failed(issue) => {
                    ctx.counters.files_failed += 1;
                    ctx.record(issue);
                }
                FileOutcome::Skipped => skipped += 1,
            }
        }
        if skipped > 0 {
            ctx.record(IngestionIssue::Deadline { skipped });
        }

        ctx.counters.rows_normalized = records.len();
        let (records, dropped) = dedupe_by_key(records);
        ctx.counters.rows_deduplicated = dropped;
        if dropped > 0 {
            info!("[{tag}] Collapsed {dropped} record(s) sharing a key with a later one");
        }
        Ok(Dataset { files, records })
    }

    fn parse_all(
        &self,
        files: &[DiscoveredFile],
        mapper: &RecordMapper,
        deadline: Option<Instant>,
        ctx: &IngestionContext,
    ) -> Vec<FileOutcome> {
        let process = |file: &DiscoveredFile| {
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return FileOutcome::Skipped;
            }
            match csv_ingest::ingest(&file.source, file.metadata.clone()) {
                Ok(rows) => FileOutcome::Parsed {
                    rows_read: rows.len(),
                    mapped: mapper.map(&rows),
                },
                Err(issue) => FileOutcome::Failed(issue),
            }
        };

        if self.config.workers <= 1 {
            return files.iter().map(process).collect();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
        {
            Ok(pool) => pool.install(|| files.par_iter().map(process).collect()),
            Err(err) => {
                warn!(
                    "[{}] Cannot start {} worker(s), parsing sequentially: {err}",
                    ctx.tag(),
                    self.config.workers
                );
                files.iter().map(process).collect()
            }
        }
    }

    /// Synchronizes the schema and upserts an already collected dataset.
    pub fn persist<F>(&self, mut ctx: IngestionContext, dataset: &Dataset, connect: F) -> RunSummary
    where
        F: FnOnce() -> Result<Box<dyn TableStore>, StoreError>,
    {
        let tag = ctx.tag();
        if self.config.dry_run {
            info!(
                "[{tag}] Dry run: {} record(s) ready, nothing written",
                dataset.records.len()
            );
            return RunSummary::from_context(&ctx, true, None, None);
        }

        let mut store = match connect() {
            Ok(store) => store,
            Err(source) => {
                let err = IngestError::Connection {
                    target: self.target_description(),
                    source,
                };
                error!("[{tag}] {}", err.report());
                return RunSummary::from_context(&ctx, false, Some(&err), None);
            }
        };

        let table = &self.config.table;
        let mut synchronizer = SchemaSynchronizer::new(table.clone());
        let schema = match synchronizer.synchronize(store.as_mut(), &mut ctx) {
            Ok(schema) => schema,
            Err(err) => {
                ctx.record(IngestionIssue::Schema {
                    statement: format!("synchronize {table}"),
                    message: err.to_string(),
                });
                ctx.counters.rows_skipped = dataset.records.len();
                return RunSummary::from_context(&ctx, false, None, None);
            }
        };

        let engine = UpsertEngine::new(table.clone(), self.config.batch_size);
        let outcome = engine.upsert(store.as_mut(), &schema, &dataset.records, &mut ctx);
        ctx.counters.rows_upserted = outcome.upserted;
        ctx.counters.rows_skipped = outcome.skipped;

        let table_rows_after = match store.count_rows(table) {
            Ok(count) => Some(count),
            Err(err) => {
                warn!("[{tag}] Cannot count rows in {table}: {err}");
                None
            }
        };
        info!(
            "[{tag}] Upserted {} row(s), skipped {} in {} batch(es)",
            outcome.upserted, outcome.skipped, outcome.batches
        );
        RunSummary::from_context(&ctx, false, None, table_rows_after)
    }

    /// Full run with an injected connector.
    pub fn run_with<F>(&self, connect: F) -> RunSummary
    where
        F: FnOnce() -> Result<Box<dyn TableStore>, StoreError>,
    {
        let mut ctx = IngestionContext::new();
        info!("[{}] Ingestion run {} started", ctx.tag(), ctx.run_id());
        match self.collect(&mut ctx) {
            Ok(dataset) => self.persist(ctx, &dataset, connect),
            Err(err) => {
                error!("[{}] {}", ctx.tag(), err.report());
                RunSummary::from_context(&ctx, self.config.dry_run, Some(&err), None)
            }
        }
    }

    /// Full run connecting to the configured database.
    pub fn run(&self) -> RunSummary {
        self.run_with(|| match &self.config.database {
            Some(target) => target.connect(),
            None => Err(StoreError::UnsupportedTarget("no database configured".into())),
        })
    }

    fn target_description(&self) -> String {
        self.config
            .database
            .as_ref()
            .map(|target| target.describe())
            .unwrap_or_else(|| "injected store".to_string())
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
