//! Pluggable collectors fed by a single discovery walk.
//!
//! A discovery session asks every registered store whether it is already
//! initialized for the requested inputs. Only the pending ones are set up,
//! and all of them share one walk of the base directory.

mod package_json;
mod source_files;
mod tsconfig;

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::AnalysisConfiguration;
use crate::error::AnalysisError;
use crate::request::ProjectFileInput;
use crate::walker::{ProjectWalker, WalkConfig, WalkEvent, WalkSummary};

pub use package_json::{PackageJsonStore, PackageManifest};
pub use source_files::SourceFileStore;
pub use tsconfig::{TsConfigOrigin, TsConfigStore, write_tsconfig, tsconfig_object};

/// Files listed explicitly by the host, keyed by absolute path.
pub type InputFiles = BTreeMap<PathBuf, ProjectFileInput>;

/// Inputs of one discovery session.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryContext<'a> {
    pub base_dir: &'a Path,
    pub config: &'a AnalysisConfiguration,
    pub input_files: Option<&'a InputFiles>,
}

impl<'a> DiscoveryContext<'a> {
    pub fn new(base_dir: &'a Path, config: &'a AnalysisConfiguration) -> Self {
        Self {
            base_dir,
            config,
            input_files: None,
        }
    }

    pub fn with_input_files(mut self, input_files: Option<&'a InputFiles>) -> Self {
        self.input_files = input_files;
        self
    }
}

/// A collector invoked during the discovery walk.
pub trait FileStore: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the store already holds valid data for `ctx`.
    ///
    /// A store may satisfy itself from `ctx.input_files` here without a walk.
    fn is_initialized(&mut self, ctx: &DiscoveryContext<'_>) -> bool;

    /// Resets the store before a walk.
    fn setup(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError>;

    /// Called for every non-excluded file.
    fn process_file(&mut self, path: &Path, ctx: &DiscoveryContext<'_>);

    /// Whether [`FileStore::process_directory`] should be called.
    fn supports_directories(&self) -> bool {
        false
    }

    /// Called for every non-excluded directory when supported.
    fn process_directory(&mut self, _dir: &Path, _ctx: &DiscoveryContext<'_>) {}

    /// Finalizes the store once the walk is complete.
    fn post_process(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Result of a discovery session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Stores that were (re)built, in registration order.
    pub refreshed: Vec<&'static str>,
    /// Walk counters, when a walk happened.
    pub walk: Option<WalkSummary>,
}

impl DiscoveryOutcome {
    pub fn walked(&self) -> bool {
        self.walk.is_some()
    }
}

/// Owns the stores and drives discovery sessions.
#[derive(Default)]
pub struct FileStoreRegistry {
    stores: Vec<Box<dyn FileStore>>,
    walks: usize,
}

impl FileStoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the source file, package manifest and tsconfig stores.
    pub fn with_default_stores() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SourceFileStore::new()));
        registry.register(Box::new(PackageJsonStore::new()));
        registry.register(Box::new(TsConfigStore::new()));
        registry
    }

    pub fn register(&mut self, store: Box<dyn FileStore>) {
        self.stores.push(store);
    }

    /// Number of walks performed so far.
    pub fn walk_count(&self) -> usize {
        self.walks
    }

    pub fn store<T: FileStore + 'static>(&self) -> Option<&T> {
        self.stores
            .iter()
            .find_map(|store| store.as_any().downcast_ref::<T>())
    }

    pub fn store_mut<T: FileStore + 'static>(&mut self) -> Option<&mut T> {
        self.stores
            .iter_mut()
            .find_map(|store| store.as_any_mut().downcast_mut::<T>())
    }

    /// Runs a discovery session.
    ///
    /// Stores already initialized for `ctx` are skipped. When none is pending
    /// the filesystem is not touched; otherwise the pending stores are set up,
    /// fed by one walk, then post-processed in registration order.
    pub fn discover(
        &mut self,
        ctx: &DiscoveryContext<'_>,
    ) -> Result<DiscoveryOutcome, AnalysisError> {
        let pending: Vec<usize> = self
            .stores
            .iter_mut()
            .enumerate()
            .filter_map(|(i, store)| (!store.is_initialized(ctx)).then_some(i))
            .collect();

        if pending.is_empty() {
            debug!("All file stores are initialized for {}", ctx.base_dir.display());
            return Ok(DiscoveryOutcome::default());
        }

        if !ctx.base_dir.is_dir() {
            return Err(AnalysisError::validation(format!(
                "Base directory does not exist: {}",
                ctx.base_dir.display()
            )));
        }

        for &i in &pending {
            self.stores[i].setup(ctx)?;
        }

        let walker = ProjectWalker::new(
            WalkConfig::new().excludes(ctx.config.exclusion_patterns()),
        );
        let stores = &mut self.stores;
        let summary = walker.walk(ctx.base_dir, &mut |event| match event {
            WalkEvent::File(path) => {
                for &i in &pending {
                    stores[i].process_file(path, ctx);
                }
            }
            WalkEvent::Directory(dir) => {
                for &i in &pending {
                    if stores[i].supports_directories() {
                        stores[i].process_directory(dir, ctx);
                    }
                }
            }
        });
        self.walks += 1;

        let mut refreshed = Vec::with_capacity(pending.len());
        for &i in &pending {
            self.stores[i].post_process(ctx)?;
            refreshed.push(self.stores[i].name());
        }

        info!(
            "Discovery of {} refreshed stores [{}]",
            ctx.base_dir.display(),
            refreshed.join(", ")
        );
        Ok(DiscoveryOutcome {
            refreshed,
            walk: Some(summary),
        })
    }

    /// Marks every store as uninitialized by clearing its data.
    pub fn clear(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        for store in &mut self.stores {
            store.setup(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Records every call it receives into a shared journal.
    struct RecordingStore {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        initialized: bool,
        directories: bool,
    }

    impl RecordingStore {
        fn new(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                initialized: false,
                directories: false,
            }
        }

        fn log(&self, entry: String) {
            self.journal.lock().push(format!("{}:{}", self.name, entry));
        }
    }

    impl FileStore for RecordingStore {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_initialized(&mut self, _ctx: &DiscoveryContext<'_>) -> bool {
            self.initialized
        }

        fn setup(&mut self, _ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
            self.log("setup".to_string());
            Ok(())
        }

        fn process_file(&mut self, path: &Path, ctx: &DiscoveryContext<'_>) {
            let relative = path.strip_prefix(ctx.base_dir).unwrap();
            self.log(format!("file {}", relative.display()));
        }

        fn supports_directories(&self) -> bool {
            self.directories
        }

        fn process_directory(&mut self, dir: &Path, ctx: &DiscoveryContext<'_>) {
            let relative = dir.strip_prefix(ctx.base_dir).unwrap();
            self.log(format!("dir {}", relative.display()));
        }

        fn post_process(&mut self, _ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
            self.log("post".to_string());
            self.initialized = true;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/a.js"), "a();").unwrap();
        fs::create_dir_all(temp.path().join("node_modules/x")).unwrap();
        fs::write(temp.path().join("node_modules/x/index.js"), "").unwrap();
        temp
    }

    #[test]
    fn test_single_walk_feeds_all_pending_stores() {
        let temp = project();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FileStoreRegistry::new();
        registry.register(Box::new(RecordingStore::new("first", &journal)));
        let mut second = RecordingStore::new("second", &journal);
        second.directories = true;
        registry.register(Box::new(second));

        let config = AnalysisConfiguration::default();
        let ctx = DiscoveryContext::new(temp.path(), &config);
        let outcome = registry.discover(&ctx).unwrap();

        assert_eq!(registry.walk_count(), 1);
        assert_eq!(outcome.refreshed, vec!["first", "second"]);
        assert!(outcome.walked());
        assert_eq!(
            *journal.lock(),
            vec![
                "first:setup",
                "second:setup",
                "second:dir src",
                "first:file src/a.js",
                "second:file src/a.js",
                "first:post",
                "second:post",
            ]
        );
    }

    #[test]
    fn test_initialized_stores_are_skipped() {
        let temp = project();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FileStoreRegistry::new();
        let mut ready = RecordingStore::new("ready", &journal);
        ready.initialized = true;
        registry.register(Box::new(ready));
        registry.register(Box::new(RecordingStore::new("pending", &journal)));

        let config = AnalysisConfiguration::default();
        let ctx = DiscoveryContext::new(temp.path(), &config);
        let outcome = registry.discover(&ctx).unwrap();

        assert_eq!(outcome.refreshed, vec!["pending"]);
        assert!(journal.lock().iter().all(|entry| entry.starts_with("pending:")));
    }

    #[test]
    fn test_no_pending_store_means_no_walk() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FileStoreRegistry::new();
        let mut ready = RecordingStore::new("ready", &journal);
        ready.initialized = true;
        registry.register(Box::new(ready));

        let config = AnalysisConfiguration::default();
        // The directory does not exist: proves the filesystem is not touched.
        let ctx = DiscoveryContext::new(Path::new("/definitely/not/here"), &config);
        let outcome = registry.discover(&ctx).unwrap();

        assert_eq!(outcome, DiscoveryOutcome::default());
        assert_eq!(registry.walk_count(), 0);
        assert!(journal.lock().is_empty());
    }

    #[test]
    fn test_missing_base_dir_is_validation_error() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = FileStoreRegistry::new();
        registry.register(Box::new(RecordingStore::new("pending", &journal)));

        let config = AnalysisConfiguration::default();
        let ctx = DiscoveryContext::new(Path::new("/definitely/not/here"), &config);
        let err = registry.discover(&ctx).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }

    #[test]
    fn test_store_downcast() {
        let registry = FileStoreRegistry::with_default_stores();
        assert!(registry.store::<SourceFileStore>().is_some());
        assert!(registry.store::<PackageJsonStore>().is_some());
        assert!(registry.store::<TsConfigStore>().is_some());
    }
}
