//! Store collecting `package.json` manifests.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{DiscoveryContext, FileStore};
use crate::error::AnalysisError;

const PACKAGE_JSON: &str = "package.json";

/// Dependency sections read from a manifest.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    peer_dependencies: BTreeMap<String, serde_json::Value>,
}

/// A parsed `package.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub path: PathBuf,
    pub name: Option<String>,
    pub dependencies: BTreeSet<String>,
}

impl PackageManifest {
    /// Reads and parses a manifest.
    pub fn read(path: &Path) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path)?;
        let raw: RawManifest = serde_json::from_str(&content).map_err(|e| {
            AnalysisError::config(format!("Invalid {}: {}", path.display(), e))
        })?;
        let dependencies = raw
            .dependencies
            .into_keys()
            .chain(raw.dev_dependencies.into_keys())
            .chain(raw.peer_dependencies.into_keys())
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            name: raw.name,
            dependencies,
        })
    }
}

/// Records every manifest found during the walk, keyed by directory.
#[derive(Debug, Default)]
pub struct PackageJsonStore {
    manifests: BTreeMap<PathBuf, PackageManifest>,
    base_dir: Option<PathBuf>,
    key: Option<String>,
}

impl PackageJsonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manifests(&self) -> impl Iterator<Item = &PackageManifest> {
        self.manifests.values()
    }

    /// Dependencies visible from `file`.
    ///
    /// Manifests are looked up from the file's directory upwards, stopping at
    /// the base directory; the nearest manifest comes first and the result is
    /// the union of all of them.
    pub fn dependencies_for(&self, file: &Path) -> BTreeSet<String> {
        let mut dependencies = BTreeSet::new();
        for dir in file.ancestors().skip(1) {
            if let Some(manifest) = self.manifests.get(dir) {
                dependencies.extend(manifest.dependencies.iter().cloned());
            }
            if self.base_dir.as_deref() == Some(dir) {
                break;
            }
        }
        dependencies
    }

    /// Nearest manifest above `file`.
    pub fn nearest_manifest(&self, file: &Path) -> Option<&PackageManifest> {
        file.ancestors()
            .skip(1)
            .find_map(|dir| self.manifests.get(dir))
    }
}

impl FileStore for PackageJsonStore {
    fn name(&self) -> &'static str {
        "package-json"
    }

    fn is_initialized(&mut self, ctx: &DiscoveryContext<'_>) -> bool {
        let changed = ctx.config.has_fs_event(|event| {
            event.path().file_name().is_some_and(|n| n == PACKAGE_JSON)
        });
        if changed {
            debug!("A package.json changed on disk; rediscovering manifests");
            return false;
        }
        self.key.as_deref() == Some(ctx.config.discovery_key(ctx.base_dir).as_str())
    }

    fn setup(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        self.manifests.clear();
        self.base_dir = Some(ctx.base_dir.to_path_buf());
        self.key = None;
        Ok(())
    }

    fn process_file(&mut self, path: &Path, _ctx: &DiscoveryContext<'_>) {
        if path.file_name().is_none_or(|n| n != PACKAGE_JSON) {
            return;
        }
        match PackageManifest::read(path) {
            Ok(manifest) => {
                if let Some(dir) = path.parent() {
                    self.manifests.insert(dir.to_path_buf(), manifest);
                }
            }
            Err(e) => warn!("Ignoring {}: {}", path.display(), e),
        }
    }

    fn post_process(&mut self, ctx: &DiscoveryContext<'_>) -> Result<(), AnalysisError> {
        info!("Found {} package.json manifests", self.manifests.len());
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
