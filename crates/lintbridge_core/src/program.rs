//! Analysis programs built from tsconfig manifests.
//!
//! A program is the expensive, project-scoped context shared by every file of
//! a project: its resolved root files and their content fingerprints. Programs
//! live in a [`ProgramCache`] keyed by the canonical manifest path.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use jsonc_parser::ParseOptions;
use lintbridge_cache::{CacheStats, ProgramCache, fingerprint};
use rayon::prelude::*;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::AnalysisError;
use crate::language::LanguageClassifier;

const DEFAULT_INCLUDE: &str = "**/*";
const DEFAULT_EXCLUDE: &[&str] = &["node_modules", "bower_components", "jspm_packages"];

/// Identifier handed to callers for a program created from `tsconfig`.
///
/// Derived from the path as given, so routing layers can compute it without
/// touching the filesystem.
pub fn program_id_for(tsconfig: &Path) -> String {
    let hash = fingerprint(tsconfig.to_string_lossy().as_bytes());
    format!("program-{}", &hash[..16])
}

/// A resolved project descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    /// Canonical path of the tsconfig.
    pub path: PathBuf,
    pub root_files: Vec<PathBuf>,
    pub project_references: Vec<PathBuf>,
    pub compiler_options: Value,
    /// The tsconfig did not exist; an empty configuration was used.
    pub missing: bool,
    pub fingerprint: String,
}

impl ProjectManifest {
    /// Resolves a tsconfig into its root files and references.
    ///
    /// `extends` is not followed. A missing tsconfig yields an empty
    /// configuration with `missing` set.
    pub fn resolve(tsconfig: &Path, classifier: &LanguageClassifier) -> Result<Self, AnalysisError> {
        let (path, text, missing) = match fs::canonicalize(tsconfig) {
            Ok(path) => {
                let text = fs::read_to_string(&path)?;
                (path, text, false)
            }
            Err(_) => {
                warn!(
                    "Could not find tsconfig {}; using an empty configuration",
                    tsconfig.display()
                );
                (normalize(tsconfig), "{}".to_string(), true)
            }
        };

        let value = jsonc_parser::parse_to_serde_value(&text, &ParseOptions::default())
            .map_err(|e| AnalysisError::program(format!("Failed to parse {}: {}", path.display(), e)))?
            .unwrap_or_else(|| Value::Object(Map::new()));
        let Value::Object(object) = value else {
            return Err(AnalysisError::program(format!(
                "{} does not contain a JSON object",
                path.display()
            )));
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let compiler_options = object
            .get("compilerOptions")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let root_files = if missing {
            Vec::new()
        } else {
            resolve_root_files(&dir, &object, classifier)?
        };
        let project_references = resolve_references(&dir, &object);

        let mut hashed = text.clone();
        hashed.push('\0');
        hashed.push_str(&compiler_options.to_string());
        for file in &root_files {
            hashed.push('\0');
            hashed.push_str(&file.to_string_lossy());
        }

        Ok(Self {
            path,
            root_files,
            project_references,
            compiler_options,
            missing,
            fingerprint: fingerprint(hashed),
        })
    }
}

fn string_array(object: &Map<String, Value>, field: &str) -> Result<Option<Vec<String>>, AnalysisError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    AnalysisError::program(format!("'{}' must only contain strings", field))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(AnalysisError::program(format!("'{}' must be an array", field))),
    }
}

fn resolve_root_files(
    dir: &Path,
    object: &Map<String, Value>,
    classifier: &LanguageClassifier,
) -> Result<Vec<PathBuf>, AnalysisError> {
    let files = string_array(object, "files")?;
    let include = match string_array(object, "include")? {
        Some(include) => include,
        // An explicit `files` list disables the default include.
        None if files.is_some() => Vec::new(),
        None => vec![DEFAULT_INCLUDE.to_string()],
    };
    let exclude = string_array(object, "exclude")?
        .unwrap_or_else(|| DEFAULT_EXCLUDE.iter().map(|s| (*s).to_string()).collect());

    let mut roots = BTreeSet::new();
    for file in files.unwrap_or_default() {
        let path = normalize(&dir.join(&file));
        if !path.is_file() {
            return Err(AnalysisError::program(format!(
                "File '{}' listed in {} not found",
                path.display(),
                dir.join("tsconfig.json").display()
            )));
        }
        roots.insert(path);
    }

    if !include.is_empty() {
        let includes = absolute_globs(dir, &include, "include");
        let excludes = absolute_globs(dir, &exclude, "exclude");
        for root in walk_roots(dir, &include) {
            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0 || !excludes.as_ref().is_some_and(|set| set.is_match(entry.path()))
                });
            for entry in walker.filter_map(Result::ok) {
                let path = entry.path();
                if entry.file_type().is_file()
                    && classifier.is_js_ts(path)
                    && includes.as_ref().is_some_and(|set| set.is_match(path))
                {
                    roots.insert(path.to_path_buf());
                }
            }
        }
    }
    Ok(roots.into_iter().collect())
}

/// Glob set matching absolute paths; a pattern naming a directory also
/// matches its contents.
fn absolute_globs(dir: &Path, patterns: &[String], name: &str) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let absolute = normalize(&dir.join(pattern)).to_string_lossy().into_owned();
        let mut candidates = vec![absolute.clone()];
        if !has_glob(pattern) {
            candidates.push(format!("{}/**", absolute.trim_end_matches('/')));
        }
        for candidate in candidates {
            match Glob::new(&candidate) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => warn!("Invalid tsconfig {} pattern {:?}: {}", name, pattern, e),
            }
        }
    }
    builder.build().ok()
}

/// Directories to walk: the literal prefix of every include pattern.
fn walk_roots(dir: &Path, include: &[String]) -> BTreeSet<PathBuf> {
    let mut roots = BTreeSet::new();
    for pattern in include {
        let mut root = PathBuf::new();
        for component in normalize(&dir.join(pattern)).components() {
            if has_glob(&component.as_os_str().to_string_lossy()) {
                break;
            }
            root.push(component);
        }
        if root.is_file() {
            root.pop();
        }
        if root.is_dir() {
            roots.insert(root);
        }
    }
    // Drop roots nested in another root.
    let all: Vec<PathBuf> = roots.iter().cloned().collect();
    roots.retain(|r| !all.iter().any(|other| other != r && r.starts_with(other)));
    roots
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn resolve_references(dir: &Path, object: &Map<String, Value>) -> Vec<PathBuf> {
    let Some(Value::Array(references)) = object.get("references") else {
        return Vec::new();
    };
    references
        .iter()
        .filter_map(|reference| reference.get("path").and_then(Value::as_str))
        .filter_map(|reference| {
            let mut path = normalize(&dir.join(reference));
            if path.is_dir() {
                path.push("tsconfig.json");
            }
            match fs::canonicalize(&path) {
                Ok(path) => Some(path),
                Err(_) => {
                    warn!("Skipping missing project reference {}", path.display());
                    None
                }
            }
        })
        .collect()
}

/// Cache key of a path: canonical when it exists, otherwise its normalized
/// form under the canonical parent directory.
fn program_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let path = normalize(path);
    match (path.parent().and_then(|dir| fs::canonicalize(dir).ok()), path.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => path,
    }
}

/// Lexically resolves `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// The built, reusable analysis context of one project.
#[derive(Debug)]
pub struct AnalysisProgram {
    pub id: String,
    pub manifest: ProjectManifest,
    /// Content fingerprint of every root file.
    pub file_hashes: BTreeMap<PathBuf, String>,
}

impl AnalysisProgram {
    /// Builds a program, hashing the root files in parallel.
    pub fn build(manifest: ProjectManifest) -> Result<Self, AnalysisError> {
        let hashes = manifest
            .root_files
            .par_iter()
            .map(|file| {
                fs::read(file)
                    .map(|bytes| (file.clone(), fingerprint(bytes)))
                    .map_err(|e| {
                        AnalysisError::program(format!("Cannot read {}: {}", file.display(), e))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        debug!(
            "Built program for {} with {} root files",
            manifest.path.display(),
            hashes.len()
        );
        Ok(Self {
            id: program_id_for(&manifest.path),
            manifest,
            file_hashes: hashes,
        })
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.file_hashes.contains_key(file)
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.file_hashes.keys().cloned().collect()
    }
}

/// Outcome of [`ProgramRegistry::get_or_create`].
#[derive(Debug, Clone)]
pub struct ProgramHandle {
    /// Identifier to hand back to the caller.
    pub id: String,
    pub program: Arc<AnalysisProgram>,
    /// Whether this call built the program.
    pub created: bool,
}

/// Programs of one analysis session, addressable by id or tsconfig.
#[derive(Default)]
pub struct ProgramRegistry {
    cache: ProgramCache<PathBuf, AnalysisProgram>,
    ids: HashMap<String, PathBuf>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the program for `tsconfig`, building it at most once.
    ///
    /// A cached program is returned without touching its tsconfig or root
    /// files; call [`ProgramRegistry::invalidate`] when they change.
    pub fn get_or_create(
        &mut self,
        tsconfig: &Path,
        classifier: &LanguageClassifier,
    ) -> Result<ProgramHandle, AnalysisError> {
        let key = program_key(tsconfig);
        let id = program_id_for(tsconfig);

        let (program, created) = match self.cache.get(&key) {
            Some(program) => (program, false),
            None => {
                let manifest = ProjectManifest::resolve(tsconfig, classifier)?;
                let manifest_fingerprint = manifest.fingerprint.clone();
                let mut created = false;
                let program = self.cache.get_or_try_insert_with(
                    key.clone(),
                    Some(&manifest_fingerprint),
                    || {
                        created = true;
                        AnalysisProgram::build(manifest)
                    },
                )?;
                (program, created)
            }
        };

        self.ids.insert(id.clone(), key.clone());
        self.ids.insert(program.id.clone(), key);
        if created {
            info!(
                "Created program {} for {} ({} files)",
                id,
                tsconfig.display(),
                program.file_hashes.len()
            );
        }
        Ok(ProgramHandle {
            id,
            program,
            created,
        })
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<AnalysisProgram>> {
        self.ids.get(id).and_then(|key| self.cache.get(key))
    }

    /// First cached program whose root files contain `file`.
    pub fn find_program_for_file(&self, file: &Path) -> Option<Arc<AnalysisProgram>> {
        self.cache
            .find(|_, program| program.contains(file))
            .map(|(_, program)| program)
    }

    /// Removes a program and every id pointing at it.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(key) = self.ids.remove(id) else {
            return false;
        };
        self.ids.retain(|_, other| *other != key);
        self.cache.invalidate(&key);
        info!("Deleted program {}", id);
        true
    }

    /// Drops the program built from `tsconfig`, if any.
    pub fn invalidate(&mut self, tsconfig: &Path) -> bool {
        let key = program_key(tsconfig);
        self.ids.retain(|_, other| *other != key);
        let removed = self.cache.invalidate(&key);
        if removed {
            debug!("Invalidated program for {}", tsconfig.display());
        }
        removed
    }

    /// Drops every program whose project directory contains `path`.
    pub fn invalidate_containing(&mut self, path: &Path) -> usize {
        let path = program_key(path);
        let stale: BTreeSet<PathBuf> = self
            .ids
            .values()
            .filter(|key| key.parent().is_some_and(|dir| path.starts_with(dir)))
            .cloned()
            .collect();
        stale.iter().filter(|key| self.invalidate(key)).count()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
