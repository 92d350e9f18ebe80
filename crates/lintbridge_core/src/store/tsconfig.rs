//! Store resolving the tsconfig files of a project.

use std::any::Any;
use std::io::Write;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::{Value, json};
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

use super::{DiscoveryContext, FileStore};
use crate::config::FsEventKind;
use crate::error::AnalysisError;
use crate::language::LanguageClassifier;

const TSCONFIG_JSON: &str = "tsconfig.json";

/// Where the tsconfig files in use come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TsConfigOrigin {
    /// Matched the configured `tsConfigPaths`.
    Property,
    /// Every `tsconfig.json` found in the project.
    Lookup,
    /// Generated because the project has none.
    Fallback,
}

/// Builds a tsconfig object listing `files` or `include` patterns.
pub fn tsconfig_object(files: Option<Vec<String>>, include: Option<Vec<String>>) -> Value {
    let mut tsconfig = json!({
        "compilerOptions": {
            "allowJs": true,
            "noImplicitAny": true,
        }
    });
    if let Some(files) = files {
        tsconfig["files"] = json!(files);
    }
    if let Some(include) = include {
        tsconfig["include"] = json!(include);
    }
    tsconfig
}

/// Writes `tsconfig` to a temporary file removed when the returned path drops.
pub fn write_tsconfig(tsconfig: &Value) -> Result<TempPath, AnalysisError> {
    let mut file = tempfile::Builder::new()
        .prefix("tsconfig-")
        .suffix(".json")
        .tempfile()?;
    let content = serde_json::to_vec_pretty(tsconfig)
        .map_err(|e| AnalysisError::validation(format!("Invalid tsconfig object: {}", e)))?;
    file.write_all(&content)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Collects tsconfig candidates and settles on the ones to use.
#[derive(Debug, Default)]
pub struct TsConfigStore {
    origin: Option<TsConfigOrigin>,
    tsconfigs: Vec<PathBuf>,
    key: Option<String>,
    provided_globs: Option<GlobSet>,
    provided_paths: Vec<PathBuf>,
    found_property: Vec<PathBuf>,
    found_lookup: Vec<PathBuf>,
    js_ts_files: Vec<PathBuf>,
    classifier: LanguageClassifier,
    fallback: Option<TempPath>,
}

impl TsConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tsconfig files in use.
    pub fn tsconfigs(&self) -> Result<&[PathBuf], AnalysisError> {
        if self.origin.is_none() {
            return Err(AnalysisError::validation(
                "TsConfig store has not been initialized. Run file discovery before reading it.",
            ));
        }
        Ok(self.tsconfigs.as_slice())
    }

    pub fn origin(&self) -> Option<TsConfigOrigin> {
        self.origin
    }

    /// Initialization key: `[baseDir, tsConfigPaths]` with explicit paths, `baseDir` otherwise.
    fn key_for(ctx: &DiscoveryContext<'_>) -> String {
        let mut key = ctx.base_dir.to_string_lossy().into_owned();
        if !ctx.config.ts_config_paths.is_empty() {
            key.push('\0');
            key.push_str(&ctx.config.ts_config_paths.join(","));
        }
        lintbridge_cache::fingerprint(key)
    }

    fn is_dirty(&self, ctx: &DiscoveryContext<'_>) -> bool {
        let classifier = LanguageClassifier::from_config(ctx.config);
        ctx.config.has_fs_event(|event| {
            let is_tsconfig = event
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("tsconfig") && n.ends_with(".json"));
            let changes_fallback = self.origin == Some(TsConfigOrigin::Fallback)
                && event.kind() != FsEventKind::Modified
                && classifier.is_js_ts(event.path());
            is_tsconfig || changes_fallback
        })
    }

    fn build_provided(&mut self, ctx: &DiscoveryContext<'_>) {
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;
        for pattern in &ctx.config.ts_config_paths {
            let path = Path::new(pattern);
            if path.is_absolute() {
                self.provided_paths.push(path.to_path_buf());
                continue;
            }
            self.provided_paths.push(ctx.base_dir.join(path));
            let mut candidates = vec![pattern.clone()];
            if !pattern.contains('/') {
                candidates.push(format!("**/{}", pattern));
            }
            for candidate in candidates {
                match GlobBuilder::new(&candidate).case_insensitive(true).build() {
                    Ok(glob) => {
                        builder.add(glob);
                        has_globs = true;
                    }
                    Err(e) => warn!("Invalid tsconfig pattern {:?}: {}", candidate, e),
                }
            }
        }
        if has_globs {
            match builder.build() {
                Ok(set) => self.provided_globs = Some(set),
                Err(e) => warn!("Failed to build tsconfig glob set: {}", e),
            }
        }
    }

    fn is_provided(&self, path: &Path, base_dir: &Path) -> bool {
        if self.provided_paths.iter().any(|p| p == path) {
            return true;
        }
        let relative = path.strip_prefix(base_dir).unwrap_or(path);
        self.provided_globs
            .as_ref()
            .is_some_and(|set| set.is_match(relative))
    }

    fn write_fallback(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        let tsconfig = if ctx.config.sonarlint {
            if self.js_ts_files.len() >= ctx.config.max_files_for_type_checking {
                warn!(
                    "Project has {} JS/TS files, more than the {} allowed for type checking; no tsconfig will be used",
                    self.js_ts_files.len(),
                    ctx.config.max_files_for_type_checking
                );
                self.tsconfigs.clear();
                return Ok(());
            }
            let include = ctx.base_dir.join("**").join("*");
            tsconfig_object(None, Some(vec![include.to_string_lossy().into_owned()]))
        } else {
            let files = self
                .js_ts_files
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            tsconfig_object(Some(files), None)
        };

        let path = write_tsconfig(&tsconfig)?;
        debug!("Wrote fallback tsconfig {}", path.display());
        self.tsconfigs = vec![path.to_path_buf()];
        self.fallback = Some(path);
        Ok(())
    }
}

impl FileStore for TsConfigStore {
    fn name(&self) -> &'static str {
        "tsconfig"
    }

    fn is_initialized(&mut self, ctx: &DiscoveryContext<'_>) -> bool {
        if self.is_dirty(ctx) {
            debug!("tsconfig inputs changed on disk; rediscovering");
            return false;
        }
        self.origin.is_some() && self.key.as_deref() == Some(Self::key_for(ctx).as_str())
    }

    fn setup(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        self.origin = None;
        self.tsconfigs.clear();
        self.key = None;
        self.provided_globs = None;
        self.provided_paths.clear();
        self.found_property.clear();
        self.found_lookup.clear();
        self.js_ts_files.clear();
        self.classifier = LanguageClassifier::from_config(ctx.config);
        self.fallback = None;
        self.build_provided(ctx);
        Ok(())
    }

    fn process_file(&mut self, path: &Path, ctx: &DiscoveryContext<'_>) {
        if self.is_provided(path, ctx.base_dir) {
            self.found_property.push(path.to_path_buf());
        }
        if path.file_name().is_some_and(|n| n == TSCONFIG_JSON) {
            self.found_lookup.push(path.to_path_buf());
        }
        if self.classifier.is_js_ts(path) {
            self.js_ts_files.push(path.to_path_buf());
        }
    }

    fn post_process(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        if !ctx.config.ts_config_paths.is_empty() {
            if self.found_property.is_empty() {
                error!(
                    "Failed to find any of the provided tsconfig.json files: {}",
                    ctx.config.ts_config_paths.join(", ")
                );
            } else {
                self.origin = Some(TsConfigOrigin::Property);
                self.tsconfigs = std::mem::take(&mut self.found_property);
            }
        }

        if self.origin.is_none() && !self.found_lookup.is_empty() {
            self.origin = Some(TsConfigOrigin::Lookup);
            self.tsconfigs = std::mem::take(&mut self.found_lookup);
        }

        if self.origin.is_none() {
            self.write_fallback(ctx)?;
            self.origin = Some(TsConfigOrigin::Fallback);
        }

        self.key = Some(Self::key_for(ctx));
        info!(
            "Using {} tsconfig file(s) from {:?}",
            self.tsconfigs.len(),
            self.origin
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
