//! Error taxonomy for an ingestion run.
//!
//! Two families live here:
//!
//! - [`IngestError`]: conditions that end a run before anything is written
//!   (unreachable root, unreachable database, invalid configuration).
//! - [`IngestionIssue`]: everything else. Issues are collected into the run
//!   summary and never stop the pipeline.
//!
//! [`StoreError`] wraps the two database drivers behind a single type so the
//! schema synchronizer and the upsert engine stay backend-agnostic.

use std::{error::Error as StdError, fmt, io, iter, path::PathBuf};

use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot open root directory {path:?}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cannot connect to {target}")]
    Connection {
        target: String,
        #[source]
        source: StoreError,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    /// The message followed by each underlying cause, `: `-separated.
    pub fn report(&self) -> String {
        iter::successors(Some(self as &dyn StdError), |&err| err.source())
            .map(ToString::to_string)
            .join(": ")
    }
}

/// Which folder level an unexpected directory name was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderLevel {
    Phase,
    RivetType,
}

impl fmt::Display for FolderLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FolderLevel::Phase => f.write_str("phase"),
            FolderLevel::RivetType => f.write_str("rivet type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestionIssue {
    #[error("Cannot list {path:?}: {message}")]
    Scan { path: PathBuf, message: String },
    #[error("Skipping unrecognized {level} folder '{folder}' for client {client}")]
    UnexpectedFolder {
        client: String,
        folder: String,
        level: FolderLevel,
    },
    #[error("Cannot parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("No timestamp pattern matched '{file_name}'; using lot '{lot}' and the fallback epoch")]
    Extraction { file_name: String, lot: String },
    #[error("Schema statement failed ({statement}): {message}")]
    Schema { statement: String, message: String },
    #[error("Table {table} has no key column '{column}'; {rows} row(s) not written")]
    MissingKey {
        table: String,
        column: String,
        rows: usize,
    },
    #[error("Batch {batch} ({rows} row(s)) failed: {message}")]
    Batch {
        batch: usize,
        rows: usize,
        message: String,
    },
    #[error("Deadline reached; {skipped} file(s) were not processed")]
    Deadline { skipped: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Postgres(#[from] postgres::Error),
    #[error("Unsupported database target '{0}'")]
    UnsupportedTarget(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_issue_mentions_row_count() {
        let issue = IngestionIssue::Batch {
            batch: 3,
            rows: 250,
            message: "CHECK constraint failed".into(),
        };
        let rendered = issue.to_string();
        assert!(rendered.contains("Batch 3"));
        assert!(rendered.contains("250 row(s)"));
    }

    #[test]
    fn unexpected_folder_names_the_level() {
        let issue = IngestionIssue::UnexpectedFolder {
            client: "RPLL".into(),
            folder: "OLD".into(),
            level: FolderLevel::Phase,
        };
        assert_eq!(
            issue.to_string(),
            "Skipping unrecognized phase folder 'OLD' for client RPLL"
        );
    }
}
