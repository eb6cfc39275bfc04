//! Discovery of station exports under a network-share root.
//!
//! Three folder conventions coexist on the share and are told apart by client
//! name alone (see [`LayoutConfig`]), never by looking at what a folder holds:
//!
//! ```text
//! root/CLIENT/REFERENCE/*.csv                       Standard
//! root/CLIENT/PHASE/REFERENCE/*.csv                 Phased
//! root/CLIENT/RIVET_TYPE/CAVITY/*.csv               Cavity
//! ```
//!
//! [`Walk`] is lazy at client granularity and yields files and soft warnings in
//! sorted name order. Only an unreadable root is an error.

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{FolderLevel, IngestError, IngestionIssue};

/// Folder layout strategy for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryWalker {
    Standard,
    Phased,
    Cavity,
}

impl DirectoryWalker {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectoryWalker::Standard => "standard",
            DirectoryWalker::Phased => "phased",
            DirectoryWalker::Cavity => "cavity",
        }
    }
}

/// Client-to-layout table plus the closed folder vocabularies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Root children containing any of these (case-insensitive) are not clients.
    pub excluded_folders: Vec<String>,
    pub phased_clients: Vec<String>,
    pub phases: Vec<String>,
    pub cavity_client: String,
    pub rivet_types: Vec<String>,
    /// `fase` stamped on files outside the phased layout; `None` leaves it NULL.
    pub default_phase: Option<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            excluded_folders: to_strings(&["calibration", "measured", "projectes", "destructor"]),
            phased_clients: to_strings(&["RPLL", "SAMS", "TAKATA"]),
            phases: to_strings(&["MATRIU", "PLA", "REMATXAT", "MATRIU + REMATXAT"]),
            cavity_client: "PTCOVER".to_string(),
            rivet_types: to_strings(&["4 RIVETS", "5 RIVETS"]),
            default_phase: Some("Única".to_string()),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl LayoutConfig {
    pub fn strategy_for(&self, client: &str) -> DirectoryWalker {
        if self.cavity_client.eq_ignore_ascii_case(client) {
            DirectoryWalker::Cavity
        } else if self
            .phased_clients
            .iter()
            .any(|c| c.eq_ignore_ascii_case(client))
        {
            DirectoryWalker::Phased
        } else {
            DirectoryWalker::Standard
        }
    }

    pub fn is_excluded(&self, folder: &str) -> bool {
        let lowered = folder.to_lowercase();
        self.excluded_folders
            .iter()
            .any(|pattern| !pattern.is_empty() && lowered.contains(&pattern.to_lowercase()))
    }

    /// Canonical spelling of a recognized phase folder.
    pub fn match_phase(&self, folder: &str) -> Option<&str> {
        match_vocabulary(&self.phases, folder)
    }

    pub fn match_rivet_type(&self, folder: &str) -> Option<&str> {
        match_vocabulary(&self.rivet_types, folder)
    }
}

fn match_vocabulary<'a>(vocabulary: &'a [String], folder: &str) -> Option<&'a str> {
    let folder = folder.trim();
    vocabulary
        .iter()
        .find(|known| known.eq_ignore_ascii_case(folder))
        .map(String::as_str)
}

/// A CSV file found on the share, with everything its location says about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub client: String,
    /// Reference folder, or `RIVET_TYPE_CAVITY` for cavity files.
    pub reference: String,
    pub phase: Option<String>,
    pub rivet_type: Option<String>,
    pub cavity: Option<String>,
    pub strategy: DirectoryWalker,
}

impl SourceFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Discovered {
    File(SourceFile),
    Warning(IngestionIssue),
}

/// Opens `root` and returns the lazy discovery sequence.
pub fn walk<'a>(root: &Path, layout: &'a LayoutConfig) -> Result<Walk<'a>, IngestError> {
    let discovery = |source: io::Error| IngestError::Discovery {
        path: root.to_path_buf(),
        source,
    };
    if root.exists() && !root.is_dir() {
        return Err(discovery(io::Error::new(
            io::ErrorKind::NotADirectory,
            "root is not a directory",
        )));
    }
    let listing = list_dir(root).map_err(|err| discovery(err.into()))?;

    let mut pending = VecDeque::new();
    for issue in listing.issues {
        pending.push_back(Discovered::Warning(issue));
    }
    let clients = listing
        .dirs
        .into_iter()
        .filter(|(name, _)| {
            let excluded = layout.is_excluded(name);
            if excluded {
                debug!("Skipping system folder '{name}'");
            }
            !excluded
        })
        .collect::<Vec<_>>();

    Ok(Walk {
        layout,
        clients: clients.into_iter(),
        pending,
    })
}

pub struct Walk<'a> {
    layout: &'a LayoutConfig,
    clients: std::vec::IntoIter<(String, PathBuf)>,
    pending: VecDeque<Discovered>,
}

impl Iterator for Walk<'_> {
    type Item = Discovered;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let (client, dir) = self.clients.next()?;
            self.walk_client(&client, &dir);
        }
    }
}

impl Walk<'_> {
    fn walk_client(&mut self, client: &str, dir: &Path) {
        let strategy = self.layout.strategy_for(client);
        debug!("Walking client '{client}' as {}", strategy.as_str());
        let Some(children) = self.list_or_warn(dir) else {
            return;
        };

        for (name, path) in children {
            match strategy {
                DirectoryWalker::Standard => {
                    let template = SourceFile {
                        path: PathBuf::new(),
                        client: client.to_string(),
                        reference: name,
                        phase: self.layout.default_phase.clone(),
                        rivet_type: None,
                        cavity: None,
                        strategy,
                    };
                    self.push_csv_files(&path, &template);
                }
                DirectoryWalker::Phased => {
                    let Some(phase) = self.layout.match_phase(&name).map(str::to_string) else {
                        self.warn_unexpected(client, &name, FolderLevel::Phase);
                        continue;
                    };
                    let Some(references) = self.list_or_warn(&path) else {
                        continue;
                    };
                    for (reference, reference_dir) in references {
                        let template = SourceFile {
                            path: PathBuf::new(),
                            client: client.to_string(),
                            reference,
                            phase: Some(phase.clone()),
                            rivet_type: None,
                            cavity: None,
                            strategy,
                        };
                        self.push_csv_files(&reference_dir, &template);
                    }
                }
                DirectoryWalker::Cavity => {
                    let Some(rivet_type) = self.layout.match_rivet_type(&name).map(str::to_string)
                    else {
                        self.warn_unexpected(client, &name, FolderLevel::RivetType);
                        continue;
                    };
                    let Some(cavities) = self.list_or_warn(&path) else {
                        continue;
                    };
                    for (cavity, cavity_dir) in cavities {
                        let template = SourceFile {
                            path: PathBuf::new(),
                            client: client.to_string(),
                            reference: format!("{rivet_type}_{cavity}"),
                            phase: self.layout.default_phase.clone(),
                            rivet_type: Some(rivet_type.clone()),
                            cavity: Some(cavity),
                            strategy,
                        };
                        self.push_csv_files(&cavity_dir, &template);
                    }
                }
            }
        }
    }

    /// Subdirectories of `dir`; files at this level are ignored.
    fn list_or_warn(&mut self, dir: &Path) -> Option<Vec<(String, PathBuf)>> {
        match list_dir(dir) {
            Ok(listing) => {
                self.absorb(listing.issues);
                Some(listing.dirs)
            }
            Err(err) => {
                self.pending.push_back(Discovered::Warning(IngestionIssue::Scan {
                    path: dir.to_path_buf(),
                    message: err.to_string(),
                }));
                None
            }
        }
    }

    fn push_csv_files(&mut self, dir: &Path, template: &SourceFile) {
        let listing = match list_dir(dir) {
            Ok(listing) => listing,
            Err(err) => {
                self.pending.push_back(Discovered::Warning(IngestionIssue::Scan {
                    path: dir.to_path_buf(),
                    message: err.to_string(),
                }));
                return;
            }
        };
        self.absorb(listing.issues);
        for (name, path) in listing.files {
            if !has_csv_extension(&name) {
                continue;
            }
            let mut file = template.clone();
            file.path = path;
            self.pending.push_back(Discovered::File(file));
        }
    }

    fn warn_unexpected(&mut self, client: &str, folder: &str, level: FolderLevel) {
        self.pending
            .push_back(Discovered::Warning(IngestionIssue::UnexpectedFolder {
                client: client.to_string(),
                folder: folder.to_string(),
                level,
            }));
    }

    fn absorb(&mut self, issues: Vec<IngestionIssue>) {
        self.pending
            .extend(issues.into_iter().map(Discovered::Warning));
    }
}

pub fn has_csv_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

#[derive(Default)]
struct Listing {
    dirs: Vec<(String, PathBuf)>,
    files: Vec<(String, PathBuf)>,
    issues: Vec<IngestionIssue>,
}

/// Immediate children of `dir`, sorted by name. An error at depth 0 means
/// `dir` itself could not be listed; deeper errors become per-entry issues.
fn list_dir(dir: &Path) -> Result<Listing, walkdir::Error> {
    let mut listing = Listing::default();
    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in entries {
        match entry {
            Ok(entry) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    listing.dirs.push((name, entry.into_path()));
                } else if file_type.is_file() {
                    listing.files.push((name, entry.into_path()));
                }
            }
            Err(err) if err.depth() == 0 => return Err(err),
            Err(err) => listing.issues.push(IngestionIssue::Scan {
                path: err.path().unwrap_or(dir).to_path_buf(),
                message: err.to_string(),
            }),
        }
    }
    Ok(listing)
}
