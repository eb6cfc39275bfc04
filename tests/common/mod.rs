#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use gompc_ingest::config::IngestConfig;
use gompc_ingest::store::DatabaseTarget;
use tempfile::{TempDir, tempdir};

/// Header used by current station firmware.
pub const HEADER: &str = "Element;Property;Nominal;Actual;Tol -;Tol +;Dev;Check;Out;Alignment";

/// A small export in the station's default `;` dialect with decimal commas.
pub fn sample_export() -> String {
    [
        HEADER,
        "Circle 1;Diameter;12,000;12,050;-0,100;0,100;0,050;OK;;A1",
        "Plane Δ;Flatness;0,000;0,020;0,000;0,050;0,020;OK;;A1",
        "Slot 3;Width;5,000;5,300;-0,100;0,100;0,300;NOK;X;A1",
    ]
    .join("\n")
        + "\n"
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` at `relative`, creating parent folders.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        self.write_bytes(relative, contents.as_bytes())
    }

    pub fn write_bytes(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent folders");
        }
        fs::write(&path, bytes).expect("write temp file contents");
        path
    }

    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        fs::create_dir_all(&path).expect("create folder");
        path
    }

    /// A config rooted at this workspace, writing to a SQLite file inside it.
    pub fn config(&self) -> IngestConfig {
        IngestConfig {
            root: self.path().to_path_buf(),
            workers: 2,
            reference_year: Some(2024),
            database: Some(DatabaseTarget::Sqlite {
                path: self.path().join("spc.db"),
            }),
            ..IngestConfig::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.path().join("spc.db")
    }
}
