//! Analysis requests and their outputs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AnalysisConfiguration, FileType, LinterConfig, RuleConfig};
use crate::error::{AnalysisError, ErrorPayload};
use crate::language::Language;
use crate::program::program_id_for;

/// A single-file analysis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInput {
    pub file_path: PathBuf,
    /// Content provided by the host; read from disk when absent.
    #[serde(default)]
    pub file_content: Option<String>,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub ts_configs: Vec<PathBuf>,
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub ignore_header_comments: bool,
}

impl FileInput {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            file_content: None,
            file_type: FileType::Main,
            language: None,
            ts_configs: Vec::new(),
            program_id: None,
            ignore_header_comments: false,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.file_content = Some(content.into());
        self
    }
}

/// A file listed explicitly in a project analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileInput {
    #[serde(default)]
    pub file_content: Option<String>,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub language: Option<Language>,
}

/// Input of a whole-project analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysisInput {
    #[serde(default)]
    pub configuration: AnalysisConfiguration,
    /// Files to analyze; discovered from `baseDir` when absent.
    #[serde(default)]
    pub files: Option<BTreeMap<PathBuf, ProjectFileInput>>,
    /// Rules to install before analyzing; keeps the current linter when empty.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub bundles: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsConfigInput {
    pub ts_config: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramIdInput {
    pub program_id: String,
}

/// Every request kind a worker understands.
///
/// On the wire a request is the envelope `{"type": kind, "data": payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AnalysisRequest {
    #[serde(rename = "init-linter")]
    InitLinter(LinterConfig),
    #[serde(
        rename = "analyze-jsts",
        alias = "analyze-js",
        alias = "analyze-ts",
        alias = "analyze-with-program"
    )]
    AnalyzeJsTs(FileInput),
    #[serde(rename = "analyze-css")]
    AnalyzeCss(FileInput),
    #[serde(rename = "analyze-html")]
    AnalyzeHtml(FileInput),
    #[serde(rename = "analyze-yaml")]
    AnalyzeYaml(FileInput),
    #[serde(rename = "analyze-project")]
    AnalyzeProject(ProjectAnalysisInput),
    #[serde(rename = "create-program")]
    CreateProgram(TsConfigInput),
    #[serde(rename = "delete-program")]
    DeleteProgram(ProgramIdInput),
    #[serde(rename = "tsconfig-files")]
    TsConfigFiles(TsConfigInput),
    #[serde(rename = "new-tsconfig")]
    NewTsConfig,
    #[serde(rename = "create-tsconfig-file")]
    CreateTsConfigFile(Value),
}

impl AnalysisRequest {
    /// Builds a request from a kind name and its JSON payload.
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, AnalysisError> {
        let envelope = if data.is_null() {
            serde_json::json!({ "type": kind })
        } else {
            serde_json::json!({ "type": kind, "data": data })
        };
        Self::from_envelope(envelope)
    }

    /// Parses a `{type, data}` envelope.
    pub fn from_envelope(envelope: Value) -> Result<Self, AnalysisError> {
        serde_json::from_value(envelope)
            .map_err(|e| AnalysisError::validation(format!("Invalid request: {}", e)))
    }

    /// Kind name, as used in routes and envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitLinter(_) => "init-linter",
            Self::AnalyzeJsTs(_) => "analyze-jsts",
            Self::AnalyzeCss(_) => "analyze-css",
            Self::AnalyzeHtml(_) => "analyze-html",
            Self::AnalyzeYaml(_) => "analyze-yaml",
            Self::AnalyzeProject(_) => "analyze-project",
            Self::CreateProgram(_) => "create-program",
            Self::DeleteProgram(_) => "delete-program",
            Self::TsConfigFiles(_) => "tsconfig-files",
            Self::NewTsConfig => "new-tsconfig",
            Self::CreateTsConfigFile(_) => "create-tsconfig-file",
        }
    }

    /// Whether every worker must see the request.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::InitLinter(_) | Self::DeleteProgram(_) | Self::NewTsConfig
        )
    }

    /// Key used to route program-bound requests to the worker owning the program.
    pub fn affinity(&self) -> Option<String> {
        match self {
            Self::CreateProgram(input) => Some(program_id_for(&input.ts_config)),
            Self::AnalyzeJsTs(input) => input.program_id.clone(),
            _ => None,
        }
    }
}

/// A single issue reported by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub rule_id: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    pub message: String,
}

impl Issue {
    pub fn new(rule_id: impl Into<String>, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            line,
            column,
            end_line: None,
            end_column: None,
            message: message.into(),
        }
    }

    /// Shifts the issue by `offset` lines.
    pub fn shifted(mut self, offset: u32) -> Self {
        self.line += offset;
        if let Some(end) = self.end_line.as_mut() {
            *end += offset;
        }
        self
    }
}

/// Line-level metrics of a file.
///
/// In lightweight mode only `nosonarLines` is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncloc: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_lines: Option<Vec<u32>>,
    pub nosonar_lines: Vec<u32>,
}

/// Timings in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perf {
    pub parse_time: u64,
    pub analysis_time: u64,
}

/// Output of a single-file analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisOutput {
    pub issues: Vec<Issue>,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    pub perf: Perf,
}

/// Per-file entry of a project analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileResult {
    Analyzed(FileAnalysisOutput),
    Failed(ErrorPayload),
}

impl FileResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A per-file result delivered before the final project output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalResult {
    pub filename: PathBuf,
    pub result: FileResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub warnings: Vec<String>,
    pub programs_created: Vec<PathBuf>,
    pub files_analyzed: Vec<PathBuf>,
}

/// Output of a project analysis.
///
/// When results were streamed incrementally, `files` is left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysisOutput {
    pub files: BTreeMap<PathBuf, FileResult>,
    pub meta: ProjectMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInfo {
    pub program_id: String,
    pub files: Vec<PathBuf>,
    pub project_references: Vec<PathBuf>,
    pub missing_ts_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsConfigFilesOutput {
    pub files: Vec<PathBuf>,
    pub project_references: Vec<PathBuf>,
}

/// Final reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisResponse {
    File(FileAnalysisOutput),
    Project(ProjectAnalysisOutput),
    Program(ProgramInfo),
    TsConfigFiles(TsConfigFilesOutput),
    TsConfigFile { filename: PathBuf },
    Ack(String),
}

impl AnalysisResponse {
    /// The plain `OK!` acknowledgement.
    pub fn ack() -> Self {
        Self::Ack("OK!".to_string())
    }
}
