//! Resolved file set of one analysis session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::FileType;
use crate::error::AnalysisError;
use crate::language::Language;

/// Error message returned when the cache is read before discovery completed.
pub const FILES_UNINITIALIZED: &str =
    "Files cache has not been initialized. Run file discovery before reading it.";

/// A discovered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: PathBuf,
    pub language: Language,
    pub file_type: FileType,
    /// Content provided by the host; read lazily from disk when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, language: Language, file_type: FileType) -> Self {
        Self {
            path: path.into(),
            language,
            file_type,
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

#[derive(Debug)]
struct FileSet {
    base_dir: PathBuf,
    records: HashMap<PathBuf, FileRecord>,
    order: Vec<PathBuf>,
}

/// Session-scoped cache of discovered files.
///
/// Valid only between [`FilesCache::set_files`] and the next
/// [`FilesCache::clear`]; every read outside that window fails with a
/// validation error instead of returning an empty set.
#[derive(Debug, Default)]
pub struct FilesCache {
    state: Option<FileSet>,
}

impl FilesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole file set.
    ///
    /// Later records with the same path win; the filename order is the order
    /// of first appearance.
    pub fn set_files(&mut self, base_dir: impl Into<PathBuf>, records: Vec<FileRecord>) {
        let mut order = Vec::with_capacity(records.len());
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if !map.contains_key(&record.path) {
                order.push(record.path.clone());
            }
            map.insert(record.path.clone(), record);
        }
        self.state = Some(FileSet {
            base_dir: base_dir.into(),
            records: map,
            order,
        });
    }

    /// Drops the file set.
    pub fn clear(&mut self) {
        self.state = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> Result<&FileSet, AnalysisError> {
        self.state
            .as_ref()
            .ok_or_else(|| AnalysisError::validation(FILES_UNINITIALIZED))
    }

    pub fn files(&self) -> Result<&HashMap<PathBuf, FileRecord>, AnalysisError> {
        Ok(&self.state()?.records)
    }

    /// Filenames in discovery order.
    pub fn filenames(&self) -> Result<&[PathBuf], AnalysisError> {
        Ok(self.state()?.order.as_slice())
    }

    pub fn files_count(&self) -> Result<usize, AnalysisError> {
        Ok(self.state()?.order.len())
    }

    pub fn get(&self, path: &Path) -> Result<Option<&FileRecord>, AnalysisError> {
        Ok(self.state()?.records.get(path))
    }

    pub fn base_dir(&self) -> Result<&Path, AnalysisError> {
        Ok(self.state()?.base_dir.as_path())
    }

    /// Records in discovery order.
    pub fn records(&self) -> Result<impl Iterator<Item = &FileRecord>, AnalysisError> {
        let state = self.state()?;
        Ok(state.order.iter().filter_map(move |p| state.records.get(p)))
    }
}
