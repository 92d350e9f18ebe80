//! Single-pass project walker using the `ignore` crate.
//!
//! Exclusion patterns are evaluated once per entry, relative to the walk root.
//! Excluded directories are pruned so their contents are never visited.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

/// Configuration for a discovery walk.
///
/// `.gitignore` files are not consulted and symbolic links are not followed;
/// only the exclusion patterns apply.
#[derive(Debug, Clone, Default)]
pub struct WalkConfig {
    /// Glob patterns to exclude, relative to the walk root.
    pub exclude_patterns: Vec<String>,
}

impl WalkConfig {
    /// Creates a new `WalkConfig` with no exclusions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds several exclude glob patterns.
    pub fn excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// An entry handed to the walk visitor.
#[derive(Debug, Clone, Copy)]
pub enum WalkEvent<'a> {
    Directory(&'a Path),
    File(&'a Path),
}

/// Counters collected during one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub files: usize,
    pub directories: usize,
    pub excluded: usize,
    pub errors: usize,
}

/// Sequential walker that visits every non-excluded entry exactly once.
pub struct ProjectWalker {
    matcher: Arc<ExclusionMatcher>,
}

impl ProjectWalker {
    /// Creates a new `ProjectWalker` with the given configuration.
    pub fn new(config: WalkConfig) -> Self {
        let matcher = Arc::new(ExclusionMatcher::new(&config.exclude_patterns));
        Self { matcher }
    }

    /// Walks `root`, calling `visit` for every non-excluded file and directory.
    ///
    /// The root itself is never reported. Entries are visited in file-name order.
    pub fn walk(&self, root: &Path, visit: &mut dyn FnMut(WalkEvent<'_>)) -> WalkSummary {
        let excluded = Arc::new(AtomicUsize::new(0));
        let mut summary = WalkSummary::default();

        let mut builder = WalkBuilder::new(root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b));

        let matcher = Arc::clone(&self.matcher);
        let excluded_count = Arc::clone(&excluded);
        let filter_root = root.to_path_buf();
        builder.filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let relative = entry.path().strip_prefix(&filter_root).unwrap_or(entry.path());
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if matcher.is_excluded(relative, is_dir) {
                excluded_count.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            true
        });

        for entry in builder.build() {
            match entry {
                Ok(entry) if entry.depth() == 0 => {}
                Ok(entry) => match entry.file_type() {
                    Some(ft) if ft.is_dir() => {
                        summary.directories += 1;
                        visit(WalkEvent::Directory(entry.path()));
                    }
                    Some(ft) if ft.is_file() => {
                        summary.files += 1;
                        visit(WalkEvent::File(entry.path()));
                    }
                    _ => {}
                },
                Err(e) => {
                    summary.errors += 1;
                    debug!("Walk error: {}", e);
                }
            }
        }

        summary.excluded = excluded.load(Ordering::Relaxed);
        info!(
            "ProjectWalker: visited {} files in {} directories under {} ({} excluded, {} errors)",
            summary.files,
            summary.directories,
            root.display(),
            summary.excluded,
            summary.errors
        );
        summary
    }
}

/// Glob matcher for exclusion patterns.
///
/// Patterns ending in `/**` also exclude the directory they name, which lets
/// the walk prune the whole subtree.
struct ExclusionMatcher {
    entries: Option<GlobSet>,
    directories: Option<GlobSet>,
}

impl ExclusionMatcher {
    fn new(patterns: &[String]) -> Self {
        let directory_patterns: Vec<String> = patterns
            .iter()
            .filter_map(|p| p.strip_suffix("/**"))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            entries: build_globset(patterns, "exclude"),
            directories: build_globset(&directory_patterns, "directory exclude"),
        }
    }

    fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        if let Some(ref entries) = self.entries
            && entries.is_match(relative)
        {
            return true;
        }
        if is_dir
            && let Some(ref directories) = self.directories
            && directories.is_match(relative)
        {
            return true;
        }
        false
    }
}

/// Builds a GlobSet from a list of patterns.
///
/// Returns `None` if the pattern list is empty.
/// Logs a warning for any invalid patterns.
fn build_globset(patterns: &[String], name: &str) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                warn!("Invalid {} glob pattern {:?}: {}", name, pattern, e);
            }
        }
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(e) => {
            warn!("Failed to build {} glob set: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXCLUSIONS;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::write(root.join("index.js"), "export {}").unwrap();
        fs::write(root.join("types.d.ts"), "declare const x: number;").unwrap();
        fs::write(root.join(".eslintrc.js"), "module.exports = {}").unwrap();

        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/app.ts"), "const a = 1;").unwrap();
        fs::write(root.join("src/nested/util.js"), "const b = 2;").unwrap();

        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::write(root.join("node_modules/lib/index.js"), "").unwrap();

        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();

        temp
    }

    fn default_config() -> WalkConfig {
        WalkConfig::new().excludes(DEFAULT_EXCLUSIONS.iter().copied())
    }

    /// Files visited by a walk of `temp`, relative to it.
    fn walked_files(temp: &TempDir, config: WalkConfig) -> Vec<String> {
        let mut files = Vec::new();
        ProjectWalker::new(config).walk(temp.path(), &mut |event| {
            if let WalkEvent::File(path) = event {
                files.push(path.to_path_buf());
            }
        });
        relative(temp, files)
    }

    fn relative(temp: &TempDir, paths: Vec<PathBuf>) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| {
                p.strip_prefix(temp.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_default_exclusions() {
        let temp = create_test_tree();
        assert_eq!(
            walked_files(&temp, default_config()),
            vec!["index.js", "src/app.ts", "src/nested/util.js"]
        );
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let temp = create_test_tree();
        let mut directories = Vec::new();
        let summary = ProjectWalker::new(default_config()).walk(temp.path(), &mut |event| {
            if let WalkEvent::Directory(dir) = event {
                directories.push(dir.to_path_buf());
            }
        });

        assert_eq!(relative(&temp, directories), vec!["src", "src/nested"]);
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.files, 3);
        // .eslintrc.js, types.d.ts, node_modules, .git
        assert_eq!(summary.excluded, 4);
    }

    #[test]
    fn test_no_exclusions_visits_everything() {
        let temp = create_test_tree();
        assert_eq!(walked_files(&temp, WalkConfig::new()).len(), 7);
    }

    #[test]
    fn test_user_exclusion() {
        let temp = create_test_tree();
        let config = default_config().excludes(["src/nested/**"]);
        assert_eq!(walked_files(&temp, config), vec!["index.js", "src/app.ts"]);
    }

    #[test]
    fn test_invalid_pattern_is_ignored() {
        let matcher = ExclusionMatcher::new(&["[invalid".to_string()]);
        assert!(!matcher.is_excluded(Path::new("a.js"), false));
    }

    #[test]
    fn test_trailing_globstar_excludes_the_directory() {
        let matcher = ExclusionMatcher::new(&default_config().exclude_patterns);
        assert!(matcher.is_excluded(Path::new("node_modules"), true));
        assert!(matcher.is_excluded(Path::new("packages/a/node_modules"), true));
        assert!(!matcher.is_excluded(Path::new("node_modules"), false));
        assert!(!matcher.is_excluded(Path::new("src"), true));
    }
}
