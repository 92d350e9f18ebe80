//! Analysis and linter configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::language::{DEFAULT_CSS_SUFFIXES, DEFAULT_JS_SUFFIXES, DEFAULT_TS_SUFFIXES, Language};

/// Exclusions applied to every discovery walk.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "**/.*",
    "**/.*/**",
    "**/*.d.ts",
    "**/.git/**",
    "**/node_modules/**",
    "**/bower_components/**",
    "**/dist/**",
    "**/vendor/**",
    "**/external/**",
    "**/contrib/**",
];

/// Default maximum file size, in kilobytes.
pub const DEFAULT_MAX_FILE_SIZE_KB: u64 = 4000;

/// Default number of files above which type-checking fallbacks are skipped.
pub const DEFAULT_MAX_FILES_FOR_TYPE_CHECKING: usize = 20_000;

/// Per-analysis configuration sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfiguration {
    /// Root of the project being analyzed.
    pub base_dir: Option<PathBuf>,
    /// IDE (lightweight) mode.
    pub sonarlint: bool,
    pub js_suffixes: Vec<String>,
    pub ts_suffixes: Vec<String>,
    pub css_suffixes: Vec<String>,
    /// Explicit tsconfig paths or patterns, relative to `base_dir`.
    pub ts_config_paths: Vec<String>,
    pub exclusions: Vec<String>,
    pub js_ts_exclusions: Vec<String>,
    /// Directories (relative to `base_dir`) holding test files.
    pub tests: Vec<String>,
    /// Maximum file size in kilobytes.
    pub max_file_size: u64,
    pub max_files_for_type_checking: usize,
    pub environments: Vec<String>,
    pub globals: Vec<String>,
    pub skip_ast: bool,
    pub ignore_header_comments: bool,
    pub allow_ts_parser_js_files: bool,
    /// Filesystem changes reported by the host since the last analysis.
    pub fs_events: Vec<FsEvent>,
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            base_dir: None,
            sonarlint: false,
            js_suffixes: owned(DEFAULT_JS_SUFFIXES),
            ts_suffixes: owned(DEFAULT_TS_SUFFIXES),
            css_suffixes: owned(DEFAULT_CSS_SUFFIXES),
            ts_config_paths: Vec::new(),
            exclusions: Vec::new(),
            js_ts_exclusions: Vec::new(),
            tests: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE_KB,
            max_files_for_type_checking: DEFAULT_MAX_FILES_FOR_TYPE_CHECKING,
            environments: Vec::new(),
            globals: Vec::new(),
            skip_ast: false,
            ignore_header_comments: false,
            allow_ts_parser_js_files: false,
            fs_events: Vec::new(),
        }
    }
}

impl AnalysisConfiguration {
    /// Creates a configuration rooted at `base_dir`.
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        serde_json::from_str(json)
            .map_err(|e| AnalysisError::validation(format!("Invalid configuration: {}", e)))
    }

    /// Returns the base directory or a validation error.
    pub fn require_base_dir(&self) -> Result<&Path, AnalysisError> {
        self.base_dir
            .as_deref()
            .ok_or_else(|| AnalysisError::validation("baseDir is required"))
    }

    /// All exclusion patterns in effect: defaults, then user exclusions.
    pub fn exclusion_patterns(&self) -> Vec<String> {
        let mut patterns = owned(DEFAULT_EXCLUSIONS);
        patterns.extend(self.exclusions.iter().cloned());
        patterns.extend(self.js_ts_exclusions.iter().cloned());
        patterns
    }

    /// Maximum file size in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size.saturating_mul(1000)
    }

    /// Identity of the discovery inputs that affect the resolved file set.
    pub fn discovery_key(&self, base_dir: &Path) -> String {
        let mut key = String::new();
        key.push_str(&base_dir.to_string_lossy());
        for part in [
            &self.exclusion_patterns(),
            &self.js_suffixes,
            &self.ts_suffixes,
            &self.css_suffixes,
            &self.tests,
        ] {
            key.push('\0');
            key.push_str(&part.join(","));
        }
        key.push('\0');
        key.push_str(&self.max_file_size.to_string());
        lintbridge_cache::fingerprint(key)
    }

    /// Classifies a path relative to `base_dir` as main or test code.
    pub fn file_type_of(&self, path: &Path, base_dir: &Path) -> FileType {
        let relative = path.strip_prefix(base_dir).unwrap_or(path);
        if self
            .tests
            .iter()
            .any(|dir| !dir.is_empty() && relative.starts_with(dir))
        {
            FileType::Test
        } else {
            FileType::Main
        }
    }

    /// Whether the host reported any change matching `predicate`.
    pub fn has_fs_event(&self, mut predicate: impl FnMut(&FsEvent) -> bool) -> bool {
        self.fs_events.iter().any(|event| predicate(event))
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Kind of filesystem change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
}

/// A filesystem change, serialized as `[path, kind]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEvent(pub PathBuf, pub FsEventKind);

impl FsEvent {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn kind(&self) -> FsEventKind {
        self.1
    }
}

/// Whether a file is production or test code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileType {
    #[default]
    Main,
    Test,
}

/// Analysis depth a rule participates in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisMode {
    #[default]
    Default,
    Skip,
}

/// Configuration for a single rule, as sent by `init-linter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub key: String,
    #[serde(default)]
    pub configurations: Vec<serde_json::Value>,
    #[serde(default = "default_file_type_targets")]
    pub file_type_targets: Vec<FileType>,
    /// Restricts the rule to one script language when set.
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub analysis_modes: Vec<AnalysisMode>,
}

fn default_file_type_targets() -> Vec<FileType> {
    vec![FileType::Main]
}

impl RuleConfig {
    /// Creates a rule that targets main files of every language.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            configurations: Vec::new(),
            file_type_targets: default_file_type_targets(),
            language: None,
            analysis_modes: Vec::new(),
        }
    }

    /// Whether the rule applies to a file of the given type and language.
    pub fn applies_to(&self, file_type: FileType, language: Language) -> bool {
        self.file_type_targets.contains(&file_type)
            && self.language.is_none_or(|l| l == language)
            && !self.analysis_modes.contains(&AnalysisMode::Skip)
    }
}

/// Linter configuration broadcast to workers by `init-linter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinterConfig {
    pub base_dir: PathBuf,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub globals: Vec<String>,
    #[serde(default)]
    pub sonarlint: bool,
    /// Additional rule bundle paths.
    #[serde(default)]
    pub bundles: Vec<PathBuf>,
}

impl LinterConfig {
    /// Creates an empty linter configuration for `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            rules: Vec::new(),
            environments: Vec::new(),
            globals: Vec::new(),
            sonarlint: false,
            bundles: Vec::new(),
        }
    }

    /// Rules applicable to a file of the given type and language.
    pub fn rules_for(&self, file_type: FileType, language: Language) -> Vec<&RuleConfig> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(file_type, language))
            .collect()
    }

    /// Checks the configuration before it is installed.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if let Some(rule) = self.rules.iter().find(|rule| rule.key.trim().is_empty()) {
            return Err(AnalysisError::config(format!(
                "Rule with empty key in configuration: {:?}",
                rule
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = AnalysisConfiguration::from_json("{}").unwrap();
        assert_eq!(config, AnalysisConfiguration::default());
        assert_eq!(config.max_file_size, 4000);
        assert_eq!(config.max_files_for_type_checking, 20_000);
        assert!(config.base_dir.is_none());
    }

    #[test]
    fn test_camel_case_fields() {
        let config: AnalysisConfiguration = serde_json::from_value(json!({
            "baseDir": "/proj",
            "sonarlint": true,
            "tsConfigPaths": ["tsconfig.app.json"],
            "maxFileSize": 10,
            "fsEvents": [["/proj/a.ts", "CREATED"]]
        }))
        .unwrap();
        assert_eq!(config.base_dir.as_deref(), Some(Path::new("/proj")));
        assert!(config.sonarlint);
        assert_eq!(config.ts_config_paths, vec!["tsconfig.app.json"]);
        assert_eq!(config.max_file_size_bytes(), 10_000);
        assert_eq!(
            config.fs_events,
            vec![FsEvent(PathBuf::from("/proj/a.ts"), FsEventKind::Created)]
        );
    }

    #[test]
    fn test_invalid_configuration_is_validation_error() {
        let err = AnalysisConfiguration::from_json(r#"{"maxFileSize": "big"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }

    #[test]
    fn test_exclusions_include_defaults() {
        let config = AnalysisConfiguration {
            exclusions: vec!["**/generated/**".to_string()],
            ..AnalysisConfiguration::default()
        };
        let patterns = config.exclusion_patterns();
        assert!(patterns.contains(&"**/node_modules/**".to_string()));
        assert_eq!(patterns.last().map(String::as_str), Some("**/generated/**"));
    }

    #[test]
    fn test_discovery_key_tracks_inputs() {
        let base = Path::new("/proj");
        let a = AnalysisConfiguration::default();
        let b = AnalysisConfiguration {
            exclusions: vec!["**/gen/**".to_string()],
            ..AnalysisConfiguration::default()
        };
        assert_eq!(a.discovery_key(base), a.clone().discovery_key(base));
        assert_ne!(a.discovery_key(base), b.discovery_key(base));
        assert_ne!(a.discovery_key(base), a.discovery_key(Path::new("/other")));
    }

    #[test]
    fn test_file_type_from_tests_dirs() {
        let config = AnalysisConfiguration {
            tests: vec!["test".to_string()],
            ..AnalysisConfiguration::default()
        };
        let base = Path::new("/proj");
        assert_eq!(
            config.file_type_of(Path::new("/proj/test/a.spec.js"), base),
            FileType::Test
        );
        assert_eq!(
            config.file_type_of(Path::new("/proj/src/a.js"), base),
            FileType::Main
        );
    }

    #[test]
    fn test_rules_for_filters_by_target() {
        let mut linter = LinterConfig::new("/proj");
        linter.rules.push(RuleConfig::new("no-unused"));
        linter.rules.push(RuleConfig {
            file_type_targets: vec![FileType::Test],
            ..RuleConfig::new("no-only-tests")
        });
        linter.rules.push(RuleConfig {
            language: Some(Language::Ts),
            ..RuleConfig::new("no-any")
        });

        let keys = |rules: Vec<&RuleConfig>| rules.iter().map(|r| r.key.clone()).collect::<Vec<_>>();
        assert_eq!(
            keys(linter.rules_for(FileType::Main, Language::Js)),
            vec!["no-unused"]
        );
        assert_eq!(
            keys(linter.rules_for(FileType::Main, Language::Ts)),
            vec!["no-unused", "no-any"]
        );
        assert_eq!(
            keys(linter.rules_for(FileType::Test, Language::Js)),
            vec!["no-only-tests"]
        );
    }

    #[test]
    fn test_linter_config_requires_base_dir() {
        let result: Result<LinterConfig, _> = serde_json::from_value(json!({"rules": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_linter_config_rejects_empty_rule_key() {
        let mut linter = LinterConfig::new("/proj");
        linter.rules.push(RuleConfig::new(" "));
        assert!(matches!(linter.validate(), Err(AnalysisError::Config(_))));
    }
}
