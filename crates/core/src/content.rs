//! Content model: data sources and the files enumerated from them.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{CaseflowError, Result};

/// A single file inside a data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Identifier unique within the owning data source.
    pub id: u64,
    pub data_source_id: u64,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl FileEntry {
    pub fn new(data_source_id: u64, id: u64, path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { id, data_source_id, name, path, size }
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// One top-level unit of evidence handed to an ingest job.
pub trait DataSource: Send + Sync + fmt::Debug {
    fn id(&self) -> u64;

    /// Human-readable name used in progress snapshots and messages.
    fn name(&self) -> &str;

    /// Enumerate every file the file-level pipeline should see.
    fn files(&self) -> Result<Vec<FileEntry>>;
}

/// A directory tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryDataSource {
    id: u64,
    name: String,
    root: PathBuf,
}

impl DirectoryDataSource {
    pub fn new(id: u64, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { id, name, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DataSource for DirectoryDataSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn files(&self) -> Result<Vec<FileEntry>> {
        if !self.root.is_dir() {
            return Err(CaseflowError::Enumeration {
                source_name: self.name.clone(),
                reason: format!("{} is not a directory", self.root.display()),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(data_source = %self.name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let id = files.len() as u64 + 1;
            files.push(FileEntry::new(self.id, id, entry.into_path(), size));
        }
        Ok(files)
    }
}

/// A data source backed by a fixed list of entries. Nothing is read from disk.
#[derive(Debug, Clone)]
pub struct MemoryDataSource {
    id: u64,
    name: String,
    files: Vec<FileEntry>,
}

impl MemoryDataSource {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), files: Vec::new() }
    }

    /// Convenience constructor with `count` synthetic files named `file-N`.
    pub fn with_file_count(id: u64, name: impl Into<String>, count: usize) -> Self {
        let mut source = Self::new(id, name);
        for n in 1..=count {
            source = source.with_file(format!("file-{n}"), n as u64 * 16);
        }
        source
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, size: u64) -> Self {
        let id = self.files.len() as u64 + 1;
        self.files.push(FileEntry::new(self.id, id, path, size));
        self
    }
}

impl DataSource for MemoryDataSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn files(&self) -> Result<Vec<FileEntry>> {
        Ok(self.files.clone())
    }
}
