//! # lintbridge_core
//!
//! Discovery and per-file analysis pipeline for lintbridge.
//!
//! This crate provides:
//! - Analysis configuration and the request/response model
//! - Language classification and the discovery walk
//! - Pluggable file stores sharing a single walk
//! - The session-scoped files cache
//! - Analysis programs built from tsconfig manifests
//! - The [`AnalysisSession`] owned by each worker
//!
//! ## Example
//!
//! ```rust,ignore
//! use lintbridge_core::{AnalysisRequest, AnalysisSession, LinterConfig, SessionOptions};
//!
//! let mut session = AnalysisSession::new(SessionOptions::default());
//! session.init_linter(LinterConfig::new("/proj"))?;
//!
//! let request = AnalysisRequest::from_parts("analyze-jsts", json!({"filePath": "/proj/a.js"}))?;
//! let response = session.handle(request, None)?;
//! ```

mod analyzer;
mod config;
pub mod embedded;
mod error;
mod files_cache;
mod language;
pub mod memory;
pub mod metrics;
pub mod parser;
pub mod program;
mod request;
pub mod rules;
pub mod store;
pub mod walker;

pub use analyzer::{AnalysisSession, ResultSink, SessionOptions};
pub use config::{
    AnalysisConfiguration, AnalysisMode, DEFAULT_EXCLUSIONS, FileType, FsEvent, FsEventKind,
    LinterConfig, RuleConfig,
};
pub use error::{AnalysisError, ErrorCode, ErrorKind, ErrorPayload, ParsingErrorDetail};
pub use files_cache::{FILES_UNINITIALIZED, FileRecord, FilesCache};
pub use language::{Language, LanguageClassifier};
pub use program::{AnalysisProgram, ProgramRegistry, ProjectManifest, program_id_for};
pub use request::{
    AnalysisRequest, AnalysisResponse, FileAnalysisOutput, FileInput, FileResult,
    IncrementalResult, Issue, Metrics, Perf, ProgramIdInput, ProgramInfo, ProjectAnalysisInput,
    ProjectAnalysisOutput, ProjectFileInput, ProjectMeta, TsConfigFilesOutput, TsConfigInput,
};
pub use rules::{NoopRuleEngine, RuleContext, RuleEngine};
pub use store::{DiscoveryContext, FileStore, FileStoreRegistry};
