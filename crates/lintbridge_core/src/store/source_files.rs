//! Store resolving the set of files to analyze.

use std::any::Any;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{DiscoveryContext, FileStore, InputFiles};
use crate::config::FsEventKind;
use crate::error::AnalysisError;
use crate::files_cache::{FileRecord, FilesCache};
use crate::language::LanguageClassifier;

/// Collects analyzable files into a [`FilesCache`].
///
/// The cache is cleared in `setup` and replaced as a whole in `post_process`,
/// so readers never observe a partially discovered set.
#[derive(Debug, Default)]
pub struct SourceFileStore {
    files: FilesCache,
    staged: Vec<FileRecord>,
    skipped: Vec<PathBuf>,
    classifier: LanguageClassifier,
    key: Option<String>,
}

impl SourceFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resolved file set.
    pub fn files(&self) -> &FilesCache {
        &self.files
    }

    /// Files left out because they exceed the size limit.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    fn load_input_files(&mut self, ctx: &DiscoveryContext<'_>, inputs: &InputFiles) {
        let classifier = LanguageClassifier::from_config(ctx.config);
        let records: Vec<FileRecord> = inputs
            .iter()
            .filter_map(|(path, input)| {
                let language = input
                    .language
                    .or_else(|| classifier.classify(path, input.file_content.as_deref()))?;
                let mut record = FileRecord::new(path.clone(), language, input.file_type);
                record.content = input.file_content.clone();
                Some(record)
            })
            .collect();

        debug!("Loaded {} input files without walking", records.len());
        self.files.set_files(ctx.base_dir, records);
        self.skipped.clear();
        // A set coming from the host is not reusable for a later walk.
        self.key = None;
    }

    fn invalidated_by_fs_events(&self, ctx: &DiscoveryContext<'_>) -> bool {
        let classifier = LanguageClassifier::from_config(ctx.config);
        ctx.config.has_fs_event(|event| {
            matches!(event.kind(), FsEventKind::Created | FsEventKind::Deleted)
                && classifier.classify(event.path(), None).is_some()
        })
    }
}

impl FileStore for SourceFileStore {
    fn name(&self) -> &'static str {
        "source-files"
    }

    fn is_initialized(&mut self, ctx: &DiscoveryContext<'_>) -> bool {
        if let Some(inputs) = ctx.input_files {
            self.load_input_files(ctx, inputs);
            return true;
        }
        if self.invalidated_by_fs_events(ctx) {
            debug!("Source files changed on disk; rediscovering");
            return false;
        }
        self.files.is_initialized()
            && self.key.as_deref() == Some(ctx.config.discovery_key(ctx.base_dir).as_str())
    }

    fn setup(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        self.classifier = LanguageClassifier::from_config(ctx.config);
        self.files.clear();
        self.staged.clear();
        self.skipped.clear();
        self.key = None;
        Ok(())
    }

    fn process_file(&mut self, path: &Path, ctx: &DiscoveryContext<'_>) {
        // `.vue` files are refined to TypeScript once their contents are read.
        let Some(language) = self.classifier.classify(path, None) else {
            return;
        };

        let max_size = ctx.config.max_file_size_bytes();
        match fs::metadata(path) {
            Ok(meta) if meta.len() > max_size => {
                warn!(
                    "Skipping {}: {} bytes exceeds the {} KB limit",
                    path.display(),
                    meta.len(),
                    ctx.config.max_file_size
                );
                self.skipped.push(path.to_path_buf());
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                return;
            }
        }

        let file_type = ctx.config.file_type_of(path, ctx.base_dir);
        self.staged.push(FileRecord::new(path, language, file_type));
    }

    fn post_process(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        let records = mem::take(&mut self.staged);
        info!(
            "Found {} source files under {}",
            records.len(),
            ctx.base_dir.display()
        );
        self.files.set_files(ctx.base_dir, records);
        self.key = Some(ctx.config.discovery_key(ctx.base_dir));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
