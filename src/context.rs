//! Per-run state handed explicitly to every stage.

use std::time::Instant;

use log::warn;
use serde::Serialize;
use uuid::Uuid;

use crate::error::IngestionIssue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub rows_read: usize,
    pub rows_normalized: usize,
    pub numeric_defaults: usize,
    pub rows_deduplicated: usize,
    pub rows_upserted: usize,
    pub rows_skipped: usize,
}

#[derive(Debug)]
pub struct IngestionContext {
    run_id: Uuid,
    started: Instant,
    issues: Vec<IngestionIssue>,
    pub counters: RunCounters,
}

impl Default for IngestionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            issues: Vec::new(),
            counters: RunCounters::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Short run id used to prefix log lines.
    pub fn tag(&self) -> String {
        let simple = self.run_id.simple().to_string();
        simple[..8].to_string()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Logs and keeps a non-fatal issue for the summary.
    pub fn record(&mut self, issue: IngestionIssue) {
        warn!("[{}] {issue}", self.tag());
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[IngestionIssue] {
        &self.issues
    }

    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}
